use crate::core::error::{FlowError, FlowResult};
use crate::core::types::ModuleId;
use std::collections::{BTreeSet, HashMap};

/// Manages topological sorting of flow modules
pub struct ExecutionOrderBuilder;

impl ExecutionOrderBuilder {
    /// Topologically sort `module_ids` along `edges` (source, target).
    ///
    /// Uses Kahn's algorithm with the ready set kept ordered, so among modules
    /// whose dependencies are satisfied the lowest uid always goes first.
    /// Edges touching modules outside `module_ids` are ignored.
    pub fn build_execution_order(
        module_ids: &[ModuleId],
        edges: &[(ModuleId, ModuleId)],
    ) -> FlowResult<Vec<ModuleId>> {
        let mut adj_list: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
        let mut in_degree: HashMap<ModuleId, usize> = HashMap::new();

        for id in module_ids {
            in_degree.insert(*id, 0);
            adj_list.insert(*id, Vec::new());
        }

        for (source, target) in edges {
            if !in_degree.contains_key(source) || !in_degree.contains_key(target) {
                continue;
            }
            if let Some(neighbors) = adj_list.get_mut(source) {
                neighbors.push(*target);
            }
            if let Some(degree) = in_degree.get_mut(target) {
                *degree += 1;
            }
        }

        let mut ready: BTreeSet<ModuleId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(current) = ready.pop_first() {
            order.push(current);
            if let Some(neighbors) = adj_list.get(&current) {
                for neighbor in neighbors {
                    if let Some(degree) = in_degree.get_mut(neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(*neighbor);
                        }
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let mut stuck: Vec<ModuleId> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(id, _)| *id)
                .collect();
            stuck.sort();
            return Err(FlowError::CyclicDependency(format!(
                "no total order exists for modules {:?}",
                stuck.iter().map(ToString::to_string).collect::<Vec<_>>()
            )));
        }

        Ok(order)
    }
}
