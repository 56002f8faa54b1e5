use crate::core::components::instance::ModuleInstance;
use crate::core::components::registry::PortRegistry;
use crate::core::connections::partition::{ComponentPartitioner, Partition};
use crate::core::connections::port_validator::PortValidator;
use crate::core::error::{FlowError, FlowResult};
use crate::core::types::{Binding, ModuleId, Sink, Source};
use crate::core::values::Parameters;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Arena-backed connection graph of module instances.
///
/// Instances live in a slot vector indexed through a uid map. Every binding
/// is stored on both of its endpoints; external-target keys additionally
/// record their single writer. All mutations validate before writing.
pub struct ConnectionGraph {
    registry: Arc<PortRegistry>,
    slots: Vec<Option<ModuleInstance>>,
    index: HashMap<ModuleId, usize>,
    free: Vec<usize>,
    /// Writer (module, output port) of each external-target key
    target_writers: BTreeMap<String, (ModuleId, String)>,
    /// Bumped on every structural mutation
    generation: u64,
    partition: Option<Partition>,
}

impl ConnectionGraph {
    pub fn new(registry: Arc<PortRegistry>) -> Self {
        Self {
            registry,
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            target_writers: BTreeMap::new(),
            generation: 0,
            partition: None,
        }
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    /// Structural generation, bumped by every binding or membership change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.partition = None;
    }

    /// Create an unbound instance with a fresh uid
    pub fn add_module(&mut self, type_name: &str, parameters: Parameters) -> FlowResult<ModuleId> {
        self.add_module_with_uid(ModuleId::new(), type_name, parameters)
    }

    /// Create an unbound instance under a caller-chosen uid
    pub fn add_module_with_uid(
        &mut self,
        uid: ModuleId,
        type_name: &str,
        parameters: Parameters,
    ) -> FlowResult<ModuleId> {
        if self.index.contains_key(&uid) {
            return Err(FlowError::DuplicateModule(uid));
        }
        let module_type = Arc::clone(self.registry.lookup(type_name)?);
        for name in parameters.keys() {
            if !module_type.accepts_parameter(name) {
                return Err(FlowError::UnknownParameter {
                    module: uid,
                    name: name.clone(),
                });
            }
        }

        let instance = ModuleInstance::new(uid, module_type, parameters);
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(instance);
                slot
            }
            None => {
                self.slots.push(Some(instance));
                self.slots.len() - 1
            }
        };
        self.index.insert(uid, slot);
        self.touch();
        log::debug!("Added {} module {}", type_name, uid);
        Ok(uid)
    }

    pub fn contains(&self, uid: ModuleId) -> bool {
        self.index.contains_key(&uid)
    }

    pub fn module(&self, uid: ModuleId) -> FlowResult<&ModuleInstance> {
        self.index
            .get(&uid)
            .and_then(|&slot| self.slots[slot].as_ref())
            .ok_or(FlowError::UnknownModule(uid))
    }

    pub(crate) fn module_mut(&mut self, uid: ModuleId) -> FlowResult<&mut ModuleInstance> {
        match self.index.get(&uid) {
            Some(&slot) => self.slots[slot].as_mut().ok_or(FlowError::UnknownModule(uid)),
            None => Err(FlowError::UnknownModule(uid)),
        }
    }

    /// All module uids, sorted
    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.index.keys().copied().collect();
        ids.sort();
        ids
    }

    /// All instances in uid order
    pub fn modules(&self) -> impl Iterator<Item = &ModuleInstance> {
        let mut instances: Vec<&ModuleInstance> = self.slots.iter().flatten().collect();
        instances.sort_by_key(|instance| instance.id());
        instances.into_iter()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Upstream module uids of `uid`
    pub fn dependencies(&self, uid: ModuleId) -> FlowResult<BTreeSet<ModuleId>> {
        Ok(self.module(uid)?.dependencies())
    }

    /// Whether any output of `uid` has a sink
    pub fn is_output_connected(&self, uid: ModuleId) -> FlowResult<bool> {
        Ok(self.module(uid)?.is_output_connected())
    }

    /// Module currently writing an external-target key
    pub fn target_writer(&self, key: &str) -> Option<(ModuleId, &str)> {
        self.target_writers
            .get(key)
            .map(|(id, port)| (*id, port.as_str()))
    }

    /// The full binding set, sorted
    pub fn bindings(&self) -> Vec<Binding> {
        let mut bindings = Vec::new();
        for instance in self.slots.iter().flatten() {
            for (port, source) in instance.input_bindings() {
                bindings.push(Binding::new(
                    source.clone(),
                    Sink::ModuleInput(instance.id(), port.clone()),
                ));
            }
            for (port, key) in instance.target_keys() {
                bindings.push(Binding::new(
                    Source::ModuleOutput(instance.id(), port.to_string()),
                    Sink::ExternalDataTarget(key.to_string()),
                ));
            }
        }
        bindings.sort();
        bindings
    }

    /// Whether a directed data path leads from `from` to `to`
    pub fn reaches(&self, from: ModuleId, to: ModuleId) -> bool {
        let mut stack = vec![from];
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Ok(instance) = self.module(current) {
                stack.extend(instance.dependents());
            }
        }
        false
    }

    fn ensure_input_free(&self, uid: ModuleId, port: &str) -> FlowResult<()> {
        if self.module(uid)?.input_binding(port).is_some() {
            return Err(FlowError::PortAlreadyBound {
                endpoint: format!("Input '{}' on module {}", port, uid),
            });
        }
        Ok(())
    }

    /// Bind an output of one module to an input of another
    pub fn connect(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        let source = self.module(source_uid)?;
        let target = self.module(target_uid)?;
        PortValidator::validate_source_port(source, source_port)?;
        PortValidator::validate_target_port(target, target_port)?;
        self.ensure_input_free(target_uid, target_port)?;
        if self.reaches(target_uid, source_uid) {
            return Err(FlowError::CyclicDependency(format!(
                "{}.{} -> {}.{} closes a cycle",
                source_uid, source_port, target_uid, target_port
            )));
        }

        self.module_mut(target_uid)?
            .bind_input(target_port, Source::ModuleOutput(source_uid, source_port.to_string()));
        self.module_mut(source_uid)?
            .add_sink(source_port, Sink::ModuleInput(target_uid, target_port.to_string()));
        self.touch();
        log::debug!(
            "Connected {}.{} -> {}.{}",
            source_uid,
            source_port,
            target_uid,
            target_port
        );
        Ok(())
    }

    /// Feed an input from a key of the external data-source vector
    pub fn connect_external_source(
        &mut self,
        key: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        PortValidator::validate_target_port(self.module(target_uid)?, target_port)?;
        self.ensure_input_free(target_uid, target_port)?;

        self.module_mut(target_uid)?
            .bind_input(target_port, Source::ExternalDataSource(key.to_string()));
        self.touch();
        log::debug!("Connected datasource '{}' -> {}.{}", key, target_uid, target_port);
        Ok(())
    }

    /// Deliver an output to a key of the external data-target vector.
    /// Each key accepts exactly one writer.
    pub fn connect_external_target(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        key: &str,
    ) -> FlowResult<()> {
        PortValidator::validate_source_port(self.module(source_uid)?, source_port)?;
        if let Some((writer, port)) = self.target_writers.get(key) {
            return Err(FlowError::PortAlreadyBound {
                endpoint: format!("Datatarget '{}' (written by {}.{})", key, writer, port),
            });
        }

        self.module_mut(source_uid)?
            .add_sink(source_port, Sink::ExternalDataTarget(key.to_string()));
        self.target_writers
            .insert(key.to_string(), (source_uid, source_port.to_string()));
        self.touch();
        log::debug!("Connected {}.{} -> datatarget '{}'", source_uid, source_port, key);
        Ok(())
    }

    pub fn disconnect(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        let expected = Source::ModuleOutput(source_uid, source_port.to_string());
        let bound = self
            .module(target_uid)
            .ok()
            .and_then(|instance| instance.input_binding(target_port));
        if bound != Some(&expected) || !self.contains(source_uid) {
            return Err(FlowError::BindingNotFound(format!(
                "{}.{} -> {}.{}",
                source_uid, source_port, target_uid, target_port
            )));
        }

        self.module_mut(target_uid)?.unbind_input(target_port);
        self.module_mut(source_uid)?
            .remove_sink(source_port, &Sink::ModuleInput(target_uid, target_port.to_string()));
        self.touch();
        log::debug!(
            "Disconnected {}.{} -> {}.{}",
            source_uid,
            source_port,
            target_uid,
            target_port
        );
        Ok(())
    }

    pub fn disconnect_external_source(
        &mut self,
        key: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        let expected = Source::ExternalDataSource(key.to_string());
        let bound = self
            .module(target_uid)
            .ok()
            .and_then(|instance| instance.input_binding(target_port));
        if bound != Some(&expected) {
            return Err(FlowError::BindingNotFound(format!(
                "datasource '{}' -> {}.{}",
                key, target_uid, target_port
            )));
        }

        self.module_mut(target_uid)?.unbind_input(target_port);
        self.touch();
        Ok(())
    }

    pub fn disconnect_external_target(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        key: &str,
    ) -> FlowResult<()> {
        let owned = self
            .target_writers
            .get(key)
            .map_or(false, |(id, port)| *id == source_uid && port == source_port);
        if !owned {
            return Err(FlowError::BindingNotFound(format!(
                "{}.{} -> datatarget '{}'",
                source_uid, source_port, key
            )));
        }

        self.module_mut(source_uid)?
            .remove_sink(source_port, &Sink::ExternalDataTarget(key.to_string()));
        self.target_writers.remove(key);
        self.touch();
        Ok(())
    }

    /// Remove a module together with every binding that references it
    pub fn remove_module(&mut self, uid: ModuleId) -> FlowResult<ModuleInstance> {
        let slot = *self.index.get(&uid).ok_or(FlowError::UnknownModule(uid))?;
        let instance = self.slots[slot].take().ok_or(FlowError::UnknownModule(uid))?;
        self.index.remove(&uid);
        self.free.push(slot);

        for (port, source) in instance.input_bindings() {
            if let Source::ModuleOutput(upstream, upstream_port) = source {
                if let Ok(upstream) = self.module_mut(*upstream) {
                    upstream.remove_sink(upstream_port, &Sink::ModuleInput(uid, port.clone()));
                }
            }
        }
        for sink in instance.all_output_sinks().values().flatten() {
            match sink {
                Sink::ModuleInput(downstream, port) => {
                    if let Ok(downstream) = self.module_mut(*downstream) {
                        downstream.unbind_input(port);
                    }
                }
                Sink::ExternalDataTarget(key) => {
                    self.target_writers.remove(key);
                }
            }
        }

        self.touch();
        log::debug!("Removed {} module {}", instance.type_name(), uid);
        Ok(instance)
    }

    /// Current partition, recomputed when a mutation marked it dirty
    pub fn partition(&mut self) -> &Partition {
        if self.partition.is_none() {
            let partition = ComponentPartitioner::partition(self);
            log::debug!(
                "Partitioned {} modules into {} components",
                self.len(),
                partition.components().len()
            );
            self.partition = Some(partition);
        }
        self.partition.get_or_insert_with(Partition::default)
    }

    pub fn is_partition_dirty(&self) -> bool {
        self.partition.is_none()
    }
}

impl std::fmt::Debug for ConnectionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGraph")
            .field("modules", &self.len())
            .field("target_keys", &self.target_writers.keys().collect::<Vec<_>>())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::components::module::ModuleType;
    use crate::core::components::port_specs::PortSpec;

    fn registry() -> Arc<PortRegistry> {
        let double = ModuleType::compilable(
            "Double",
            vec![PortSpec::input("inputs")],
            vec![PortSpec::output("outputs")],
            |ctx| Ok(vec![ctx.input("inputs")? * 2.0]),
        );
        let add = ModuleType::compilable(
            "Add",
            vec![PortSpec::input("input1"), PortSpec::input("input2")],
            vec![PortSpec::output("outputs")],
            |ctx| Ok(vec![ctx.input("input1")? + ctx.input("input2")?]),
        );
        Arc::new(
            PortRegistry::new()
                .with_type(double)
                .and_then(|r| r.with_type(add))
                .unwrap(),
        )
    }

    #[test]
    fn test_connect_and_disconnect_keep_both_sides() {
        let mut graph = ConnectionGraph::new(registry());
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        let b = graph.add_module("Add", Parameters::new()).unwrap();

        graph.connect(a, "outputs", b, "input1").unwrap();
        graph.connect(a, "outputs", b, "input2").unwrap();
        assert_eq!(graph.bindings().len(), 2);
        assert_eq!(graph.module(a).unwrap().output_sinks("outputs").count(), 2);
        assert!(graph.dependencies(b).unwrap().contains(&a));

        graph.disconnect(a, "outputs", b, "input1").unwrap();
        assert_eq!(graph.bindings().len(), 1);
        assert_eq!(graph.module(a).unwrap().output_sinks("outputs").count(), 1);
        assert!(matches!(
            graph.disconnect(a, "outputs", b, "input1"),
            Err(FlowError::BindingNotFound(_))
        ));
    }

    #[test]
    fn test_connect_validation_order() {
        let mut graph = ConnectionGraph::new(registry());
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        let b = graph.add_module("Double", Parameters::new()).unwrap();
        let ghost = ModuleId::new();

        assert_eq!(
            graph.connect(ghost, "outputs", b, "inputs").unwrap_err(),
            FlowError::UnknownModule(ghost)
        );
        assert!(matches!(
            graph.connect(a, "nope", b, "inputs"),
            Err(FlowError::PortNotFound { .. })
        ));
        assert!(matches!(
            graph.connect(a, "inputs", b, "inputs"),
            Err(FlowError::PortDirectionMismatch { .. })
        ));

        graph.connect(a, "outputs", b, "inputs").unwrap();
        let c = graph.add_module("Double", Parameters::new()).unwrap();
        assert!(matches!(
            graph.connect(c, "outputs", b, "inputs"),
            Err(FlowError::PortAlreadyBound { .. })
        ));
        assert!(matches!(
            graph.connect(b, "outputs", a, "inputs"),
            Err(FlowError::CyclicDependency(_))
        ));
        assert!(matches!(
            graph.connect(c, "outputs", c, "inputs"),
            Err(FlowError::CyclicDependency(_))
        ));
        // Failed calls leave the graph untouched
        assert_eq!(graph.bindings().len(), 1);
    }

    #[test]
    fn test_target_key_has_single_writer() {
        let mut graph = ConnectionGraph::new(registry());
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        let b = graph.add_module("Double", Parameters::new()).unwrap();

        graph.connect_external_target(a, "outputs", "x").unwrap();
        assert!(matches!(
            graph.connect_external_target(b, "outputs", "x"),
            Err(FlowError::PortAlreadyBound { .. })
        ));
        assert_eq!(graph.target_writer("x"), Some((a, "outputs")));

        assert!(matches!(
            graph.disconnect_external_target(b, "outputs", "x"),
            Err(FlowError::BindingNotFound(_))
        ));
        graph.disconnect_external_target(a, "outputs", "x").unwrap();
        graph.connect_external_target(b, "outputs", "x").unwrap();
    }

    #[test]
    fn test_remove_module_drops_bindings() {
        let mut graph = ConnectionGraph::new(registry());
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        let b = graph.add_module("Double", Parameters::new()).unwrap();
        let c = graph.add_module("Double", Parameters::new()).unwrap();
        graph.connect_external_source("x", a, "inputs").unwrap();
        graph.connect(a, "outputs", b, "inputs").unwrap();
        graph.connect(b, "outputs", c, "inputs").unwrap();
        graph.connect_external_target(b, "outputs", "y").unwrap();

        graph.remove_module(b).unwrap();
        assert!(!graph.contains(b));
        assert!(graph.target_writer("y").is_none());
        for binding in graph.bindings() {
            assert!(!matches!(binding.source, Source::ModuleOutput(id, _) if id == b));
            assert!(!matches!(binding.sink, Sink::ModuleInput(id, _) if id == b));
        }
        assert!(!graph.is_output_connected(a).unwrap());
        assert!(graph.module(c).unwrap().input_binding("inputs").is_none());
        assert_eq!(graph.remove_module(b).unwrap_err(), FlowError::UnknownModule(b));

        // Slot reuse keeps lookups consistent
        let d = graph.add_module("Add", Parameters::new()).unwrap();
        assert_eq!(graph.module(d).unwrap().type_name(), "Add");
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_unknown_type_and_duplicate_uid() {
        let mut graph = ConnectionGraph::new(registry());
        assert!(matches!(
            graph.add_module("Nope", Parameters::new()),
            Err(FlowError::UnknownModuleType(_))
        ));
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        assert_eq!(
            graph.add_module_with_uid(a, "Double", Parameters::new()).unwrap_err(),
            FlowError::DuplicateModule(a)
        );
    }

    #[test]
    fn test_mutations_bump_generation() {
        let mut graph = ConnectionGraph::new(registry());
        let start = graph.generation();
        let a = graph.add_module("Double", Parameters::new()).unwrap();
        graph.connect_external_source("x", a, "inputs").unwrap();
        assert_eq!(graph.generation(), start + 2);
        let _ = graph.partition();
        assert!(!graph.is_partition_dirty());
        graph.disconnect_external_source("x", a, "inputs").unwrap();
        assert!(graph.is_partition_dirty());
    }
}
