use crate::core::connections::graph::ConnectionGraph;
use crate::core::types::ModuleId;
use std::collections::{BTreeSet, HashMap};

/// Maximal set of modules connected through module-to-module bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    members: Vec<ModuleId>,
    anchored: bool,
    root: Option<ModuleId>,
    target_keys: Vec<String>,
}

impl Component {
    /// Member uids, sorted
    pub fn members(&self) -> &[ModuleId] {
        &self.members
    }

    pub fn contains(&self, uid: ModuleId) -> bool {
        self.members.binary_search(&uid).is_ok()
    }

    /// A directed path leads from an external source to an external target
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Lowest-uid member writing an external target; its activation gates the component
    pub fn root(&self) -> Option<ModuleId> {
        self.root
    }

    /// External-target keys written by members, sorted
    pub fn target_keys(&self) -> &[String] {
        &self.target_keys
    }

    pub fn min_member(&self) -> Option<ModuleId> {
        self.members.first().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Total partition of the graph's modules into components
#[derive(Debug, Clone, Default)]
pub struct Partition {
    components: Vec<Component>,
    membership: HashMap<ModuleId, usize>,
}

impl Partition {
    /// Components sorted by their minimum member uid
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_of(&self, uid: ModuleId) -> Option<&Component> {
        self.membership.get(&uid).map(|&idx| &self.components[idx])
    }

    /// Anchored components only, in partition order
    pub fn anchored(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.anchored)
    }
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Splits a connection graph into weakly-connected components.
///
/// External sources and targets are per-key endpoints and never merge
/// components.
pub struct ComponentPartitioner;

impl ComponentPartitioner {
    pub fn partition(graph: &ConnectionGraph) -> Partition {
        let ids = graph.module_ids();
        let position: HashMap<ModuleId, usize> =
            ids.iter().enumerate().map(|(idx, id)| (*id, idx)).collect();

        let mut sets = UnionFind::new(ids.len());
        for (idx, id) in ids.iter().enumerate() {
            let Ok(instance) = graph.module(*id) else {
                continue;
            };
            for upstream in instance.dependencies() {
                if let Some(&other) = position.get(&upstream) {
                    sets.union(idx, other);
                }
            }
        }

        // ids are sorted, so groups come out ordered by minimum member
        let mut groups: Vec<Vec<ModuleId>> = Vec::new();
        let mut group_of_root: HashMap<usize, usize> = HashMap::new();
        for (idx, id) in ids.iter().enumerate() {
            let root = sets.find(idx);
            let group = *group_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(*id);
        }

        let mut partition = Partition::default();
        for members in groups {
            let component = Self::describe(graph, members);
            let idx = partition.components.len();
            for member in &component.members {
                partition.membership.insert(*member, idx);
            }
            partition.components.push(component);
        }
        partition
    }

    fn describe(graph: &ConnectionGraph, members: Vec<ModuleId>) -> Component {
        let mut target_keys = BTreeSet::new();
        let mut root = None;
        for id in &members {
            if let Ok(instance) = graph.module(*id) {
                let mut writes = false;
                for (_, key) in instance.target_keys() {
                    target_keys.insert(key.to_string());
                    writes = true;
                }
                if writes && root.is_none() {
                    root = Some(*id);
                }
            }
        }
        let anchored = Self::is_anchored(graph, &members);
        Component {
            members,
            anchored,
            root,
            target_keys: target_keys.into_iter().collect(),
        }
    }

    /// Forward search from every source-reading member for a target writer
    fn is_anchored(graph: &ConnectionGraph, members: &[ModuleId]) -> bool {
        let mut stack: Vec<ModuleId> = members
            .iter()
            .copied()
            .filter(|id| graph.module(*id).map_or(false, |m| m.reads_source()))
            .collect();
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Ok(instance) = graph.module(current) else {
                continue;
            };
            if instance.writes_target() {
                return true;
            }
            stack.extend(instance.dependents());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::components::module::ModuleType;
    use crate::core::components::port_specs::PortSpec;
    use crate::core::components::registry::PortRegistry;
    use crate::core::values::Parameters;
    use std::sync::Arc;

    fn graph() -> ConnectionGraph {
        let double = ModuleType::compilable(
            "Double",
            vec![PortSpec::input("inputs")],
            vec![PortSpec::output("outputs")],
            |ctx| Ok(vec![ctx.input("inputs")? * 2.0]),
        );
        ConnectionGraph::new(Arc::new(PortRegistry::new().with_type(double).unwrap()))
    }

    #[test]
    fn test_external_endpoints_do_not_merge() {
        let mut graph = graph();
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        let b = graph.add_module("Double", Parameters::new()).unwrap();
        graph.connect_external_source("x", a, "inputs").unwrap();
        graph.connect_external_source("x", b, "inputs").unwrap();
        graph.connect_external_target(a, "outputs", "a").unwrap();
        graph.connect_external_target(b, "outputs", "b").unwrap();

        let partition = graph.partition();
        assert_eq!(partition.components().len(), 2);
        assert!(partition.components().iter().all(Component::is_anchored));
        assert_eq!(partition.component_of(a).unwrap().root(), Some(a));
        assert_eq!(partition.component_of(b).unwrap().target_keys(), ["b".to_string()]);
    }

    #[test]
    fn test_anchoring_needs_a_directed_path() {
        let mut graph = graph();
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        let b = graph.add_module("Double", Parameters::new()).unwrap();
        let c = graph.add_module("Double", Parameters::new()).unwrap();
        // a -> b, a -> c; source feeds b only and target is on c: no directed path
        graph.connect(a, "outputs", b, "inputs").unwrap();
        graph.connect(a, "outputs", c, "inputs").unwrap();
        graph.connect_external_target(c, "outputs", "y").unwrap();

        let component = graph.partition().component_of(a).unwrap().clone();
        assert_eq!(component.len(), 3);
        assert!(!component.is_anchored());
        assert_eq!(component.root(), Some(c));

        graph.connect_external_source("x", a, "inputs").unwrap();
        assert!(graph.partition().component_of(c).unwrap().is_anchored());
    }

    #[test]
    fn test_components_sorted_by_min_member() {
        let mut graph = graph();
        for _ in 0..6 {
            graph.add_module("Double", Parameters::new()).unwrap();
        }
        let partition = graph.partition();
        let mins: Vec<ModuleId> = partition
            .components()
            .iter()
            .filter_map(Component::min_member)
            .collect();
        let mut sorted = mins.clone();
        sorted.sort();
        assert_eq!(mins, sorted);
        assert_eq!(partition.components().len(), 6);
    }
}
