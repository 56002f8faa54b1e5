//! Standalone compilation and duplication of module sets.

use crate::core::connections::graph::ConnectionGraph;
use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::compiler::{Boundary, SegmentCompiler};
use crate::core::execution::pipeline::{run_stages, Stage};
use crate::core::types::{ModuleId, Sink, Source, ValueKey};
use crate::core::values::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Treatment of inputs that have no binding at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Unbound inputs fail with `UnresolvedInput`
    #[default]
    Strict,
    /// Unbound inputs become free parameters
    Partial,
}

/// Options for [`compile_subgraph`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubgraphOptions {
    /// `None` uses the engine's configured default
    pub mode: Option<BoundaryMode>,
    /// Pass shared arrays of compilable members as leading parameters
    pub expose_shared_state: bool,
}

impl SubgraphOptions {
    pub fn strict() -> Self {
        Self {
            mode: Some(BoundaryMode::Strict),
            ..Self::default()
        }
    }

    pub fn partial() -> Self {
        Self {
            mode: Some(BoundaryMode::Partial),
            ..Self::default()
        }
    }

    pub fn with_shared_state(mut self) -> Self {
        self.expose_shared_state = true;
        self
    }
}

/// A named parameter or return value of a subgraph function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubgraphPort {
    /// Port name when unique within the function, otherwise `<uid>.<port>`
    pub name: String,
    pub module_id: ModuleId,
    pub port: String,
    pub(crate) key: ValueKey,
}

/// A compiled node set callable on its own
#[derive(Debug)]
pub struct SubgraphFunction {
    members: Vec<ModuleId>,
    parameters: Vec<SubgraphPort>,
    outputs: Vec<SubgraphPort>,
    stages: Vec<Stage>,
}

impl SubgraphFunction {
    /// Members in execution order
    pub fn members(&self) -> &[ModuleId] {
        &self.members
    }

    pub fn parameters(&self) -> &[SubgraphPort] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[SubgraphPort] {
        &self.outputs
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Call with positional arguments in [`parameters`](Self::parameters) order
    pub fn call(&self, args: &[Value]) -> FlowResult<Vec<Value>> {
        if args.len() != self.parameters.len() {
            return Err(FlowError::InvalidArguments(format!(
                "expected {} arguments ({:?}), got {}",
                self.parameters.len(),
                self.parameter_names(),
                args.len()
            )));
        }
        let mut values: HashMap<ValueKey, Value> = self
            .parameters
            .iter()
            .zip(args)
            .map(|(param, value)| (param.key.clone(), value.clone()))
            .collect();
        run_stages(&self.stages, &mut values)?;

        self.outputs
            .iter()
            .map(|out| {
                values
                    .remove(&out.key)
                    .ok_or_else(|| FlowError::Evaluation(format!("no value for {}", out.key)))
            })
            .collect()
    }

    /// Call with arguments given by parameter name
    pub fn call_named(&self, args: &BTreeMap<String, Value>) -> FlowResult<Vec<Value>> {
        if let Some(unknown) = args
            .keys()
            .find(|name| !self.parameters.iter().any(|p| &p.name == *name))
        {
            return Err(FlowError::InvalidArguments(format!(
                "unknown parameter '{}'",
                unknown
            )));
        }
        let positional = self
            .parameters
            .iter()
            .map(|param| {
                args.get(&param.name).cloned().ok_or_else(|| {
                    FlowError::InvalidArguments(format!("missing parameter '{}'", param.name))
                })
            })
            .collect::<FlowResult<Vec<Value>>>()?;
        self.call(&positional)
    }
}

/// Name each entry by its port when unique, otherwise as `<uid>.<port>`
fn assign_names(entries: Vec<(ModuleId, String, ValueKey)>) -> Vec<SubgraphPort> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, port, _) in &entries {
        *counts.entry(port.as_str()).or_default() += 1;
    }
    let unique: BTreeSet<String> = counts
        .into_iter()
        .filter(|(_, count)| *count == 1)
        .map(|(port, _)| port.to_string())
        .collect();
    entries
        .into_iter()
        .map(|(module_id, port, key)| SubgraphPort {
            name: if unique.contains(&port) {
                port.clone()
            } else {
                format!("{}.{}", module_id, port)
            },
            module_id,
            port,
            key,
        })
        .collect()
}

/// Compile `nodes` into a standalone function.
///
/// Inputs fed from outside the set become parameters, outputs not consumed
/// inside the set become return values.
pub fn compile_subgraph(
    graph: &mut ConnectionGraph,
    compiler: &mut SegmentCompiler,
    nodes: &[ModuleId],
    mode: BoundaryMode,
    expose_shared_state: bool,
) -> FlowResult<SubgraphFunction> {
    if nodes.is_empty() {
        return Err(FlowError::InvalidArguments("empty node set".to_string()));
    }
    let scope: BTreeSet<ModuleId> = nodes.iter().copied().collect();
    for id in &scope {
        graph.module(*id)?;
    }

    let order = SegmentCompiler::execution_order(graph, &scope)?;
    let boundary = Boundary {
        scope: Some(scope.clone()),
        partial: mode == BoundaryMode::Partial,
        expose_shared: expose_shared_state,
    };

    let mut shared_params = Vec::new();
    let mut input_params = Vec::new();
    let mut returns = Vec::new();
    let mut required = BTreeSet::new();
    for id in &order {
        let instance = graph.module(*id)?;
        let module_type = instance.module_type();
        for port in module_type.input_port_names() {
            let key = boundary.input_key(instance, port)?;
            if matches!(key, ValueKey::Input(..)) {
                input_params.push((*id, port.to_string(), key));
            }
        }
        for port in module_type.output_port_names() {
            let consumed_inside = instance
                .output_sinks(port)
                .any(|sink| matches!(sink, Sink::ModuleInput(target, _) if scope.contains(target)));
            if !consumed_inside {
                returns.push((*id, port.to_string(), ValueKey::Port(*id, port.to_string())));
                required.insert((*id, port.to_string()));
            }
        }
    }

    SegmentCompiler::initialize(graph, &order)?;
    if expose_shared_state {
        for id in &order {
            let instance = graph.module(*id)?;
            if instance.module_type().is_compilable() {
                for name in instance.shared_state().keys() {
                    shared_params.push((*id, name.clone(), ValueKey::Shared(*id, name.clone())));
                }
            }
        }
    }

    let stages = compiler.build_stages(graph, &order, &boundary, &required)?;

    shared_params.extend(input_params);
    let function = SubgraphFunction {
        members: order,
        parameters: assign_names(shared_params),
        outputs: assign_names(returns),
        stages,
    };
    log::debug!(
        "Compiled subgraph of {} modules: parameters {:?}, outputs {:?}",
        function.members.len(),
        function.parameter_names(),
        function.output_names()
    );
    Ok(function)
}

/// Copy `nodes` under fresh uids, returning old uid -> new uid.
///
/// Parameters are cloned and shared state is deep-copied; bindings between
/// members are recreated, bindings leaving the set are dropped.
pub fn duplicate_subgraph(
    graph: &mut ConnectionGraph,
    nodes: &[ModuleId],
) -> FlowResult<BTreeMap<ModuleId, ModuleId>> {
    let members: BTreeSet<ModuleId> = nodes.iter().copied().collect();
    for id in &members {
        graph.module(*id)?;
    }

    let mut mapping = BTreeMap::new();
    let result = copy_members(graph, &members, &mut mapping);
    if let Err(err) = result {
        discard_copies(graph, mapping.values().copied());
        return Err(err);
    }
    log::debug!("Duplicated {} modules", mapping.len());
    Ok(mapping)
}

/// Remove partially duplicated modules. Every copy is attempted; failures
/// are logged and skipped. Returns how many copies were removed.
pub(crate) fn discard_copies(
    graph: &mut ConnectionGraph,
    copies: impl IntoIterator<Item = ModuleId>,
) -> usize {
    let mut removed = 0;
    for id in copies {
        match graph.remove_module(id) {
            Ok(_) => removed += 1,
            Err(err) => log::warn!("Could not roll back duplicated module {}: {}", id, err),
        }
    }
    removed
}

fn copy_members(
    graph: &mut ConnectionGraph,
    members: &BTreeSet<ModuleId>,
    mapping: &mut BTreeMap<ModuleId, ModuleId>,
) -> FlowResult<()> {
    for id in members {
        let original = graph.module(*id)?;
        let type_name = original.type_name().to_string();
        let parameters = original.parameters().clone();
        let shared: Vec<(String, _)> = original
            .shared_state()
            .iter()
            .map(|(name, array)| (name.clone(), array.deep_copy()))
            .collect();
        let initialized = original.is_initialized();

        let new_id = graph.add_module(&type_name, parameters)?;
        mapping.insert(*id, new_id);
        let copy = graph.module_mut(new_id)?;
        for (name, array) in shared {
            copy.install_shared(&name, array);
        }
        copy.set_initialized(initialized);
    }

    for id in members {
        let internal: Vec<(String, ModuleId, String)> = graph
            .module(*id)?
            .input_bindings()
            .iter()
            .filter_map(|(port, source)| match source {
                Source::ModuleOutput(src, src_port) if members.contains(src) => {
                    Some((port.clone(), *src, src_port.clone()))
                }
                _ => None,
            })
            .collect();
        for (port, src, src_port) in internal {
            let (Some(&new_src), Some(&new_target)) = (mapping.get(&src), mapping.get(id)) else {
                continue;
            };
            graph.connect(new_src, &src_port, new_target, &port)?;
        }
    }
    Ok(())
}
