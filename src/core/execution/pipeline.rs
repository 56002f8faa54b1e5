//! Compiled artifacts: fused segments, interpreted bridges and the pipelines
//! that chain them.

use crate::core::components::module::{RunContext, RunFn};
use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::kernel::FusedKernel;
use crate::core::types::{Binding, ModuleId, ValueKey};
use crate::core::values::{Parameters, SharedArray, Value};
use crate::core::world::WorldAdapter;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Cache key of a compiled artifact.
///
/// Captures the members in execution order, every binding touching a member,
/// the parameter values that were baked in and the names of the aliased
/// shared-state arrays. Handle identity is not part of the signature, so
/// replacing a handle must invalidate explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructuralSignature {
    pub members: Vec<ModuleId>,
    pub bindings: Vec<Binding>,
    pub parameters: Vec<(ModuleId, Parameters)>,
    pub shared_state: Vec<(ModuleId, String)>,
}

impl StructuralSignature {
    pub fn contains(&self, uid: ModuleId) -> bool {
        self.members.contains(&uid)
    }
}

/// One fused callable built from a maximal run of compilable modules
#[derive(Debug)]
pub struct CompiledSegment {
    pub(crate) kernel: FusedKernel,
    pub(crate) input_keys: Vec<ValueKey>,
    pub(crate) output_keys: Vec<ValueKey>,
    pub(crate) signature: StructuralSignature,
}

impl CompiledSegment {
    /// Run members in execution order
    pub fn members(&self) -> &[ModuleId] {
        &self.signature.members
    }

    pub fn input_keys(&self) -> &[ValueKey] {
        &self.input_keys
    }

    pub fn output_keys(&self) -> &[ValueKey] {
        &self.output_keys
    }

    pub fn signature(&self) -> &StructuralSignature {
        &self.signature
    }

    /// Invoke the fused kernel with positional arguments
    pub fn call(&self, args: &[Value]) -> FlowResult<Vec<Value>> {
        self.kernel.call(args)
    }
}

/// Eager invocation of one interpreted module.
///
/// Captures the run function, a snapshot of the parameters and handles on
/// the module's shared state, so the stage runs without the graph.
pub struct InterpretedCall {
    pub(crate) module_id: ModuleId,
    pub(crate) run: RunFn,
    pub(crate) input_names: Vec<String>,
    pub(crate) input_keys: Vec<ValueKey>,
    pub(crate) output_keys: Vec<ValueKey>,
    pub(crate) parameters: Parameters,
    pub(crate) shared_state: BTreeMap<String, SharedArray>,
}

impl InterpretedCall {
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    pub fn input_keys(&self) -> &[ValueKey] {
        &self.input_keys
    }

    pub fn output_keys(&self) -> &[ValueKey] {
        &self.output_keys
    }

    pub fn call(&self, inputs: &[Value]) -> FlowResult<Vec<Value>> {
        let ctx = RunContext {
            module_id: self.module_id,
            input_names: &self.input_names,
            inputs,
            parameters: &self.parameters,
            shared_state: &self.shared_state,
        };
        let outputs = (self.run)(&ctx).map_err(|err| match err {
            FlowError::ModuleFailed { .. } => err,
            other => ctx.fail(other.to_string()),
        })?;
        if outputs.len() != self.output_keys.len() {
            return Err(ctx.fail(format!(
                "returned {} values for {} output ports",
                outputs.len(),
                self.output_keys.len()
            )));
        }
        Ok(outputs)
    }
}

impl std::fmt::Debug for InterpretedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpretedCall")
            .field("module_id", &self.module_id)
            .field("input_keys", &self.input_keys)
            .field("output_keys", &self.output_keys)
            .finish()
    }
}

/// One step of a compiled pipeline
#[derive(Debug, Clone)]
pub enum Stage {
    Segment(Rc<CompiledSegment>),
    Interpreted(Rc<InterpretedCall>),
}

impl Stage {
    pub fn is_segment(&self) -> bool {
        matches!(self, Stage::Segment(_))
    }

    pub fn input_keys(&self) -> &[ValueKey] {
        match self {
            Stage::Segment(segment) => segment.input_keys(),
            Stage::Interpreted(call) => call.input_keys(),
        }
    }

    pub fn output_keys(&self) -> &[ValueKey] {
        match self {
            Stage::Segment(segment) => segment.output_keys(),
            Stage::Interpreted(call) => call.output_keys(),
        }
    }

    fn call(&self, args: &[Value]) -> FlowResult<Vec<Value>> {
        match self {
            Stage::Segment(segment) => segment.call(args),
            Stage::Interpreted(call) => call.call(args),
        }
    }
}

/// Run `stages` in order over a value table seeded with `values`.
pub(crate) fn run_stages(
    stages: &[Stage],
    values: &mut HashMap<ValueKey, Value>,
) -> FlowResult<()> {
    for stage in stages {
        let args = stage
            .input_keys()
            .iter()
            .map(|key| {
                values
                    .get(key)
                    .cloned()
                    .ok_or_else(|| FlowError::Evaluation(format!("no value for {}", key)))
            })
            .collect::<FlowResult<Vec<Value>>>()?;
        let outputs = stage.call(&args)?;
        for (key, value) in stage.output_keys().iter().zip(outputs) {
            values.insert(key.clone(), value);
        }
    }
    Ok(())
}

/// Executable form of one anchored component
#[derive(Debug)]
pub struct CompiledPipeline {
    pub(crate) signature: StructuralSignature,
    pub(crate) stages: Vec<Stage>,
    pub(crate) source_keys: Vec<String>,
    /// (produced value, external-target key)
    pub(crate) target_writes: Vec<(ValueKey, String)>,
    /// Component members at compile time, used for invalidation
    pub(crate) component: Vec<ModuleId>,
}

impl CompiledPipeline {
    pub fn signature(&self) -> &StructuralSignature {
        &self.signature
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Compiled modules in execution order
    pub fn members(&self) -> &[ModuleId] {
        &self.signature.members
    }

    pub fn source_keys(&self) -> &[String] {
        &self.source_keys
    }

    /// External-target keys this pipeline writes
    pub fn target_keys(&self) -> impl Iterator<Item = &str> {
        self.target_writes.iter().map(|(_, key)| key.as_str())
    }

    pub fn segment_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_segment()).count()
    }

    pub(crate) fn touches(&self, uid: ModuleId) -> bool {
        self.component.contains(&uid)
    }

    /// Evaluate all stages against the current source values and return the
    /// values destined for each target key.
    pub fn evaluate(&self, world: &dyn WorldAdapter) -> FlowResult<BTreeMap<String, Value>> {
        let mut values = HashMap::new();
        for key in &self.source_keys {
            values.insert(ValueKey::DataSource(key.clone()), world.read_source(key)?);
        }
        run_stages(&self.stages, &mut values)?;

        self.target_writes
            .iter()
            .map(|(value_key, target)| {
                values
                    .get(value_key)
                    .cloned()
                    .map(|value| (target.clone(), value))
                    .ok_or_else(|| FlowError::Evaluation(format!("no value for {}", value_key)))
            })
            .collect()
    }

    /// Evaluate and write every produced value into its target key.
    /// Target keys not written by this pipeline are left untouched.
    pub fn run(&self, world: &mut dyn WorldAdapter) -> FlowResult<()> {
        let produced = self.evaluate(world)?;
        for (key, value) in &produced {
            world.write_target(key, value)?;
        }
        Ok(())
    }
}
