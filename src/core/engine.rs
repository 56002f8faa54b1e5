use crate::core::components::instance::ModuleInstance;
use crate::core::components::registry::PortRegistry;
use crate::core::connections::graph::ConnectionGraph;
use crate::core::connections::partition::Component;
use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::compiler::SegmentCompiler;
use crate::core::execution::config::EngineConfig;
use crate::core::execution::driver::{StepDriver, StepReport};
use crate::core::execution::pipeline::CompiledPipeline;
use crate::core::persistence::GraphRecord;
use crate::core::subgraph::{self, SubgraphFunction, SubgraphOptions};
use crate::core::types::{Binding, InputPort, ModuleId, OutputPort};
use crate::core::values::{ParamValue, Parameters, SharedArray};
use crate::core::world::{ActivationSource, WorldAdapter};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

/// Flow-graph engine: owns the connection graph, the compiled-artifact
/// caches and the step driver.
///
/// Every structural edit goes through the engine so the caches are
/// invalidated alongside it.
pub struct FlowEngine {
    registry: Arc<PortRegistry>,
    graph: ConnectionGraph,
    compiler: SegmentCompiler,
    driver: StepDriver,
    config: EngineConfig,
}

impl FlowEngine {
    pub fn new(registry: Arc<PortRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<PortRegistry>, config: EngineConfig) -> Self {
        Self {
            graph: ConnectionGraph::new(Arc::clone(&registry)),
            compiler: SegmentCompiler::new(config.pipeline_cache),
            driver: StepDriver::new(),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    fn invalidate(&mut self, touched: impl IntoIterator<Item = ModuleId>) {
        let touched: BTreeSet<ModuleId> = touched.into_iter().collect();
        self.compiler.invalidate(&touched);
    }

    // Structure

    pub fn add_module(&mut self, type_name: &str, parameters: Parameters) -> FlowResult<ModuleId> {
        self.graph.add_module(type_name, parameters)
    }

    pub fn add_module_with_uid(
        &mut self,
        uid: ModuleId,
        type_name: &str,
        parameters: Parameters,
    ) -> FlowResult<ModuleId> {
        self.graph.add_module_with_uid(uid, type_name, parameters)
    }

    pub fn connect(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        self.graph
            .connect(source_uid, source_port, target_uid, target_port)?;
        self.invalidate([source_uid, target_uid]);
        Ok(())
    }

    /// Connect using port handles, e.g. `engine.connect_ports(a.output("y"), b.input("x"))`
    pub fn connect_ports(&mut self, source: OutputPort, target: InputPort) -> FlowResult<()> {
        self.connect(
            source.module_id(),
            source.port_name(),
            target.module_id(),
            target.port_name(),
        )
    }

    pub fn connect_external_source(
        &mut self,
        key: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        self.graph
            .connect_external_source(key, target_uid, target_port)?;
        self.invalidate([target_uid]);
        Ok(())
    }

    pub fn connect_external_target(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        key: &str,
    ) -> FlowResult<()> {
        self.graph
            .connect_external_target(source_uid, source_port, key)?;
        self.invalidate([source_uid]);
        Ok(())
    }

    pub fn disconnect(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        self.graph
            .disconnect(source_uid, source_port, target_uid, target_port)?;
        self.invalidate([source_uid, target_uid]);
        Ok(())
    }

    pub fn disconnect_external_source(
        &mut self,
        key: &str,
        target_uid: ModuleId,
        target_port: &str,
    ) -> FlowResult<()> {
        self.graph
            .disconnect_external_source(key, target_uid, target_port)?;
        self.invalidate([target_uid]);
        Ok(())
    }

    pub fn disconnect_external_target(
        &mut self,
        source_uid: ModuleId,
        source_port: &str,
        key: &str,
    ) -> FlowResult<()> {
        self.graph
            .disconnect_external_target(source_uid, source_port, key)?;
        self.invalidate([source_uid]);
        Ok(())
    }

    /// Remove a module and every binding referencing it
    pub fn remove_module(&mut self, uid: ModuleId) -> FlowResult<ModuleInstance> {
        let removed = self.graph.remove_module(uid)?;
        let mut touched = removed.dependencies();
        touched.extend(removed.dependents());
        touched.insert(uid);
        self.invalidate(touched);
        Ok(removed)
    }

    // Parameters and shared state

    pub fn set_parameter(
        &mut self,
        uid: ModuleId,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> FlowResult<()> {
        self.graph.module_mut(uid)?.set_parameter(name, value.into())?;
        self.invalidate([uid]);
        Ok(())
    }

    /// Mutate a shared array in place. Compiled code aliases the array, so
    /// the change is visible without recompilation.
    pub fn mutate_shared_state<R>(
        &mut self,
        uid: ModuleId,
        name: &str,
        f: impl FnOnce(&mut Vec<f64>) -> R,
    ) -> FlowResult<R> {
        Ok(self.graph.module(uid)?.shared(name)?.update(f))
    }

    /// Install a new array under `name`; compiled code holding the previous
    /// handle is invalidated.
    pub fn replace_shared_state(
        &mut self,
        uid: ModuleId,
        name: &str,
        values: Vec<f64>,
    ) -> FlowResult<()> {
        self.graph
            .module_mut(uid)?
            .install_shared(name, SharedArray::new(values));
        self.invalidate([uid]);
        Ok(())
    }

    /// Copy of a shared array's current contents
    pub fn shared_state(&self, uid: ModuleId, name: &str) -> FlowResult<Vec<f64>> {
        Ok(self.graph.module(uid)?.shared(name)?.to_vec())
    }

    // Queries

    pub fn module(&self, uid: ModuleId) -> FlowResult<&ModuleInstance> {
        self.graph.module(uid)
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.graph.module_ids()
    }

    pub fn dependencies(&self, uid: ModuleId) -> FlowResult<BTreeSet<ModuleId>> {
        self.graph.dependencies(uid)
    }

    pub fn is_output_connected(&self, uid: ModuleId) -> FlowResult<bool> {
        self.graph.is_output_connected(uid)
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.graph.bindings()
    }

    /// Current partition, sorted by minimum member uid
    pub fn components(&mut self) -> Vec<Component> {
        self.graph.partition().components().to_vec()
    }

    pub fn component_of(&mut self, uid: ModuleId) -> FlowResult<Component> {
        self.graph.module(uid)?;
        self.graph
            .partition()
            .component_of(uid)
            .cloned()
            .ok_or(FlowError::UnknownModule(uid))
    }

    // Compilation and execution

    /// Build or reuse the pipeline of the anchored component containing `uid`
    pub fn pipeline_for(&mut self, uid: ModuleId) -> FlowResult<Rc<CompiledPipeline>> {
        let component = self.component_of(uid)?;
        if !component.is_anchored() {
            return Err(FlowError::InvalidArguments(format!(
                "component of module {} is not anchored",
                uid
            )));
        }
        self.compiler.compile_component(&mut self.graph, &component)
    }

    /// Number of segment fusions performed so far
    pub fn build_count(&self) -> usize {
        self.compiler.build_count()
    }

    pub fn compiler(&self) -> &SegmentCompiler {
        &self.compiler
    }

    pub fn current_step(&self) -> u64 {
        self.driver.current_step()
    }

    /// Run one step over every anchored component
    pub fn step(
        &mut self,
        world: &mut dyn WorldAdapter,
        activation: &dyn ActivationSource,
    ) -> StepReport {
        self.driver.step(
            &mut self.graph,
            &mut self.compiler,
            &self.config,
            world,
            activation,
        )
    }

    // Subgraphs

    pub fn compile_subgraph(
        &mut self,
        nodes: &[ModuleId],
        options: SubgraphOptions,
    ) -> FlowResult<SubgraphFunction> {
        let mode = options.mode.unwrap_or(self.config.default_boundary_mode);
        subgraph::compile_subgraph(
            &mut self.graph,
            &mut self.compiler,
            nodes,
            mode,
            options.expose_shared_state,
        )
    }

    /// Duplicate `nodes`, returning old uid -> new uid
    pub fn duplicate_subgraph(&mut self, nodes: &[ModuleId]) -> FlowResult<BTreeMap<ModuleId, ModuleId>> {
        subgraph::duplicate_subgraph(&mut self.graph, nodes)
    }

    // Persistence

    pub fn to_record(&self) -> GraphRecord {
        GraphRecord::from_graph(&self.graph)
    }

    /// Rebuild an engine from a record; nothing compiled is carried over
    pub fn from_record(
        registry: Arc<PortRegistry>,
        record: &GraphRecord,
        config: EngineConfig,
    ) -> FlowResult<Self> {
        let mut engine = Self::with_config(registry, config);
        engine.graph = record.to_graph(Arc::clone(&engine.registry))?;
        Ok(engine)
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("graph", &self.graph)
            .field("compiler", &self.compiler)
            .field("current_step", &self.driver.current_step())
            .field("config", &self.config)
            .finish()
    }
}
