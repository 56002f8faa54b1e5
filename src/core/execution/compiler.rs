//! Segment compiler: orders a component, fuses runs of compilable modules
//! into single kernels, bridges interpreted modules and caches the results.

use crate::core::components::instance::ModuleInstance;
use crate::core::components::module::Behavior;
use crate::core::components::port_specs::PortDim;
use crate::core::connections::graph::ConnectionGraph;
use crate::core::connections::partition::Component;
use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::execution_order::ExecutionOrderBuilder;
use crate::core::execution::kernel::{BuildContext, Expr, KernelBuilder};
use crate::core::execution::pipeline::{
    CompiledPipeline, CompiledSegment, InterpretedCall, Stage, StructuralSignature,
};
use crate::core::types::{Binding, ModuleId, Sink, Source, ValueKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// How inputs at the edge of a compiled set resolve to value keys
#[derive(Debug, Clone, Default)]
pub(crate) struct Boundary {
    /// Modules computed inside the set; `None` resolves every input by its source
    pub scope: Option<BTreeSet<ModuleId>>,
    /// Unbound inputs become caller-supplied values instead of errors
    pub partial: bool,
    /// Shared arrays of compilable members become caller-supplied values
    pub expose_shared: bool,
}

impl Boundary {
    fn cacheable(&self) -> bool {
        self.scope.is_none() && !self.expose_shared
    }

    pub fn input_key(&self, instance: &ModuleInstance, port: &str) -> FlowResult<ValueKey> {
        let uid = instance.id();
        match (instance.input_binding(port), &self.scope) {
            (Some(source), None) => Ok(ValueKey::from(source)),
            (Some(Source::ModuleOutput(src, src_port)), Some(scope)) if scope.contains(src) => {
                Ok(ValueKey::Port(*src, src_port.clone()))
            }
            (Some(_), Some(_)) => Ok(ValueKey::Input(uid, port.to_string())),
            (None, Some(_)) if self.partial => Ok(ValueKey::Input(uid, port.to_string())),
            (None, _) => Err(FlowError::UnresolvedInput {
                module: uid,
                port: port.to_string(),
            }),
        }
    }
}

/// Compiles components into pipelines and keeps the artifact caches
#[derive(Debug)]
pub struct SegmentCompiler {
    segments: HashMap<StructuralSignature, Rc<CompiledSegment>>,
    pipelines: HashMap<StructuralSignature, Rc<CompiledPipeline>>,
    build_count: usize,
    caching: bool,
}

impl SegmentCompiler {
    pub fn new(caching: bool) -> Self {
        Self {
            segments: HashMap::new(),
            pipelines: HashMap::new(),
            build_count: 0,
            caching,
        }
    }

    /// Number of segment fusions performed so far
    pub fn build_count(&self) -> usize {
        self.build_count
    }

    pub fn cached_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn cached_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Drop every cached artifact that involves a touched module
    pub fn invalidate(&mut self, touched: &BTreeSet<ModuleId>) {
        let before = (self.segments.len(), self.pipelines.len());
        self.segments
            .retain(|signature, _| !signature.members.iter().any(|m| touched.contains(m)));
        self.pipelines
            .retain(|_, pipeline| !touched.iter().any(|m| pipeline.touches(*m)));
        let dropped = (
            before.0 - self.segments.len(),
            before.1 - self.pipelines.len(),
        );
        if dropped != (0, 0) {
            log::debug!(
                "Invalidated {} segments and {} pipelines",
                dropped.0,
                dropped.1
            );
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.pipelines.clear();
    }

    /// Build or reuse the pipeline of one component
    pub fn compile_component(
        &mut self,
        graph: &mut ConnectionGraph,
        component: &Component,
    ) -> FlowResult<Rc<CompiledPipeline>> {
        let active = Self::active_set(graph, component.members());
        let boundary = Boundary::default();
        for id in &active {
            let instance = graph.module(*id)?;
            for port in instance.module_type().input_port_names() {
                boundary.input_key(instance, port)?;
            }
        }

        let order = Self::execution_order(graph, &active)?;
        Self::initialize(graph, &order)?;
        let signature = Self::signature(graph, &order, true)?;
        if self.caching {
            if let Some(pipeline) = self.pipelines.get(&signature) {
                log::trace!("Reusing pipeline for {} modules", order.len());
                return Ok(Rc::clone(pipeline));
            }
        }

        let stages = self.build_stages(graph, &order, &boundary, &BTreeSet::new())?;

        let mut source_keys = BTreeSet::new();
        let mut target_writes = Vec::new();
        for id in &order {
            let instance = graph.module(*id)?;
            for source in instance.input_bindings().values() {
                if let Source::ExternalDataSource(key) = source {
                    source_keys.insert(key.clone());
                }
            }
            for (port, key) in instance.target_keys() {
                target_writes.push((ValueKey::Port(*id, port.to_string()), key.to_string()));
            }
        }

        let pipeline = Rc::new(CompiledPipeline {
            signature: signature.clone(),
            stages,
            source_keys: source_keys.into_iter().collect(),
            target_writes,
            component: component.members().to_vec(),
        });
        log::debug!(
            "Compiled pipeline for {} modules: {} stages, {} fused segments",
            order.len(),
            pipeline.stages().len(),
            pipeline.segment_count()
        );
        if self.caching {
            self.pipelines.insert(signature, Rc::clone(&pipeline));
        }
        Ok(pipeline)
    }

    /// Members that feed an external target, found by walking backwards
    /// from the target writers
    pub(crate) fn active_set(graph: &ConnectionGraph, members: &[ModuleId]) -> BTreeSet<ModuleId> {
        let mut stack: Vec<ModuleId> = members
            .iter()
            .copied()
            .filter(|id| graph.module(*id).map_or(false, ModuleInstance::writes_target))
            .collect();
        let mut active = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !active.insert(current) {
                continue;
            }
            if let Ok(instance) = graph.module(current) {
                stack.extend(instance.dependencies());
            }
        }
        active
    }

    pub(crate) fn execution_order(
        graph: &ConnectionGraph,
        modules: &BTreeSet<ModuleId>,
    ) -> FlowResult<Vec<ModuleId>> {
        let ids: Vec<ModuleId> = modules.iter().copied().collect();
        let mut edges = Vec::new();
        for id in &ids {
            for upstream in graph.module(*id)?.dependencies() {
                edges.push((upstream, *id));
            }
        }
        ExecutionOrderBuilder::build_execution_order(&ids, &edges)
    }

    /// Run pending init functions
    pub(crate) fn initialize(graph: &mut ConnectionGraph, order: &[ModuleId]) -> FlowResult<()> {
        for id in order {
            if graph.module_mut(*id)?.ensure_initialized()? {
                log::debug!("Initialised module {}", id);
            }
        }
        Ok(())
    }

    /// Signature of `order`. Interpreted members contribute parameters and
    /// shared state only when `include_interpreted` is set.
    fn signature(
        graph: &ConnectionGraph,
        order: &[ModuleId],
        include_interpreted: bool,
    ) -> FlowResult<StructuralSignature> {
        let mut bindings = BTreeSet::new();
        let mut parameters = Vec::new();
        let mut shared_state = Vec::new();
        for id in order {
            let instance = graph.module(*id)?;
            for (port, source) in instance.input_bindings() {
                bindings.insert(Binding::new(
                    source.clone(),
                    Sink::ModuleInput(*id, port.clone()),
                ));
            }
            for (port, sinks) in instance.all_output_sinks() {
                for sink in sinks {
                    bindings.insert(Binding::new(
                        Source::ModuleOutput(*id, port.clone()),
                        sink.clone(),
                    ));
                }
            }
            if include_interpreted || instance.module_type().is_compilable() {
                parameters.push((*id, instance.parameters().clone()));
                for name in instance.shared_state().keys() {
                    shared_state.push((*id, name.clone()));
                }
            }
        }
        Ok(StructuralSignature {
            members: order.to_vec(),
            bindings: bindings.into_iter().collect(),
            parameters,
            shared_state,
        })
    }

    /// Bindings touching a compilable module must join ports of equal
    /// dimensionality. External sources supply arrays and external targets
    /// take arrays; sinks outside `order` are not compiled here.
    fn check_fusion(graph: &ConnectionGraph, order: &[ModuleId]) -> FlowResult<()> {
        let compiled: BTreeSet<ModuleId> = order.iter().copied().collect();
        for id in order {
            let instance = graph.module(*id)?;
            let module_type = instance.module_type();
            if !module_type.is_compilable() {
                continue;
            }
            for port in &module_type.input_ports {
                let (source_dim, origin) = match instance.input_binding(&port.name) {
                    None => continue,
                    Some(Source::ExternalDataSource(key)) => {
                        (PortDim::Array, format!("datasource '{}'", key))
                    }
                    Some(Source::ModuleOutput(src, src_port)) => {
                        let dim = graph
                            .module(*src)?
                            .module_type()
                            .output_port(src_port)
                            .map(|spec| spec.dim)
                            .unwrap_or_default();
                        (dim, format!("{}.{}", src, src_port))
                    }
                };
                if source_dim != port.dim {
                    return Err(FlowError::UnsupportedFusion(format!(
                        "{} ({}) feeds {}.{} ({})",
                        origin, source_dim, id, port.name, port.dim
                    )));
                }
            }
            for port in &module_type.output_ports {
                for sink in instance.output_sinks(&port.name) {
                    let (sink_dim, destination) = match sink {
                        Sink::ExternalDataTarget(key) => {
                            (PortDim::Array, format!("datatarget '{}'", key))
                        }
                        Sink::ModuleInput(target, _) if !compiled.contains(target) => continue,
                        Sink::ModuleInput(target, target_port) => {
                            let dim = graph
                                .module(*target)?
                                .module_type()
                                .input_port(target_port)
                                .map(|spec| spec.dim)
                                .unwrap_or_default();
                            (dim, format!("{}.{}", target, target_port))
                        }
                    };
                    if sink_dim != port.dim {
                        return Err(FlowError::UnsupportedFusion(format!(
                            "{}.{} ({}) feeds {} ({})",
                            id, port.name, port.dim, destination, sink_dim
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Group `order` into fused segments and interpreted calls
    pub(crate) fn build_stages(
        &mut self,
        graph: &ConnectionGraph,
        order: &[ModuleId],
        boundary: &Boundary,
        required_outputs: &BTreeSet<(ModuleId, String)>,
    ) -> FlowResult<Vec<Stage>> {
        Self::check_fusion(graph, order)?;

        let mut stages = Vec::new();
        let mut run: Vec<ModuleId> = Vec::new();
        for id in order {
            let instance = graph.module(*id)?;
            if instance.module_type().is_compilable() {
                run.push(*id);
                continue;
            }
            if !run.is_empty() {
                stages.push(self.segment(graph, &run, boundary, required_outputs)?);
                run.clear();
            }
            stages.push(Stage::Interpreted(Rc::new(Self::interpreted_call(
                instance, boundary,
            )?)));
        }
        if !run.is_empty() {
            stages.push(self.segment(graph, &run, boundary, required_outputs)?);
        }
        Ok(stages)
    }

    fn segment(
        &mut self,
        graph: &ConnectionGraph,
        run: &[ModuleId],
        boundary: &Boundary,
        required_outputs: &BTreeSet<(ModuleId, String)>,
    ) -> FlowResult<Stage> {
        if !(self.caching && boundary.cacheable()) {
            let segment = self.fuse(graph, run, boundary, required_outputs, None)?;
            return Ok(Stage::Segment(Rc::new(segment)));
        }

        let signature = Self::signature(graph, run, false)?;
        if let Some(segment) = self.segments.get(&signature) {
            log::trace!("Reusing segment of {} modules", run.len());
            return Ok(Stage::Segment(Rc::clone(segment)));
        }
        let segment = Rc::new(self.fuse(graph, run, boundary, required_outputs, Some(signature.clone()))?);
        self.segments.insert(signature, Rc::clone(&segment));
        Ok(Stage::Segment(segment))
    }

    /// Lower a run of compilable modules into one kernel
    fn fuse(
        &mut self,
        graph: &ConnectionGraph,
        run: &[ModuleId],
        boundary: &Boundary,
        required_outputs: &BTreeSet<(ModuleId, String)>,
        signature: Option<StructuralSignature>,
    ) -> FlowResult<CompiledSegment> {
        let members: BTreeSet<ModuleId> = run.iter().copied().collect();
        let mut builder = KernelBuilder::new();
        let mut input_keys = Vec::new();
        let mut arguments: HashMap<ValueKey, Expr> = HashMap::new();

        // Every value entering from outside the run gets an argument slot
        for id in run {
            let instance = graph.module(*id)?;
            let mut external = Vec::new();
            if boundary.expose_shared {
                for name in instance.shared_state().keys() {
                    external.push(ValueKey::Shared(*id, name.clone()));
                }
            }
            for port in instance.module_type().input_port_names() {
                let key = boundary.input_key(instance, port)?;
                if !matches!(&key, ValueKey::Port(src, _) if members.contains(src)) {
                    external.push(key);
                }
            }
            for key in external {
                if !arguments.contains_key(&key) {
                    arguments.insert(key.clone(), builder.argument());
                    input_keys.push(key);
                }
            }
        }

        let mut produced: HashMap<ValueKey, Expr> = HashMap::new();
        let mut output_keys = Vec::new();
        let mut output_slots = Vec::new();
        for id in run {
            let instance = graph.module(*id)?;
            let module_type = instance.module_type();
            let Behavior::Compilable(build) = &module_type.behavior else {
                return Err(FlowError::UnsupportedFusion(format!(
                    "module {} is not compilable",
                    id
                )));
            };

            let mut inputs = BTreeMap::new();
            for port in module_type.input_port_names() {
                let key = boundary.input_key(instance, port)?;
                let expr = produced
                    .get(&key)
                    .or_else(|| arguments.get(&key))
                    .cloned()
                    .ok_or_else(|| FlowError::UnresolvedInput {
                        module: *id,
                        port: port.to_string(),
                    })?;
                inputs.insert(port.to_string(), expr);
            }
            let mut shared = BTreeMap::new();
            for (name, array) in instance.shared_state() {
                let expr = match arguments.get(&ValueKey::Shared(*id, name.clone())) {
                    Some(slot) => slot.clone(),
                    None => Expr::Shared(array.clone()),
                };
                shared.insert(name.clone(), expr);
            }

            let ctx = BuildContext {
                module_id: *id,
                inputs: &inputs,
                parameters: instance.parameters(),
                shared_state: &shared,
            };
            let exprs = build(&ctx)?;
            if exprs.len() != module_type.output_ports.len() {
                return Err(FlowError::ModuleFailed {
                    module: *id,
                    message: format!(
                        "build produced {} expressions for {} output ports",
                        exprs.len(),
                        module_type.output_ports.len()
                    ),
                });
            }

            for (spec, expr) in module_type.output_ports.iter().zip(exprs) {
                let slot = builder.push(expr);
                let exported = instance.output_sinks(&spec.name).any(|sink| match sink {
                    Sink::ExternalDataTarget(_) => true,
                    Sink::ModuleInput(target, _) => !members.contains(target),
                }) || required_outputs.contains(&(*id, spec.name.clone()));
                let key = ValueKey::Port(*id, spec.name.clone());
                if exported {
                    output_keys.push(key.clone());
                    output_slots.push(slot.clone());
                }
                produced.insert(key, slot);
            }
        }

        let kernel = builder.finish(&output_slots)?;
        self.build_count += 1;
        log::debug!(
            "Fused {} modules into one segment ({} inputs, {} outputs, {} steps)",
            run.len(),
            input_keys.len(),
            output_keys.len(),
            kernel.len()
        );

        let signature = match signature {
            Some(signature) => signature,
            None => Self::signature(graph, run, false)?,
        };
        Ok(CompiledSegment {
            kernel,
            input_keys,
            output_keys,
            signature,
        })
    }

    fn interpreted_call(instance: &ModuleInstance, boundary: &Boundary) -> FlowResult<InterpretedCall> {
        let module_type = instance.module_type();
        let Behavior::Interpreted(run) = &module_type.behavior else {
            return Err(FlowError::Evaluation(format!(
                "module {} is not interpreted",
                instance.id()
            )));
        };
        let input_names: Vec<String> = module_type
            .input_port_names()
            .into_iter()
            .map(String::from)
            .collect();
        let input_keys = input_names
            .iter()
            .map(|port| boundary.input_key(instance, port))
            .collect::<FlowResult<Vec<_>>>()?;
        let output_keys = module_type
            .output_port_names()
            .into_iter()
            .map(|port| ValueKey::Port(instance.id(), port.to_string()))
            .collect();
        Ok(InterpretedCall {
            module_id: instance.id(),
            run: run.clone(),
            input_names,
            input_keys,
            output_keys,
            parameters: instance.parameters().clone(),
            shared_state: instance.shared_state().clone(),
        })
    }
}

impl Default for SegmentCompiler {
    fn default() -> Self {
        Self::new(true)
    }
}
