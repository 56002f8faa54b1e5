use crate::core::components::module::{InitContext, ModuleType};
use crate::core::error::{FlowError, FlowResult};
use crate::core::types::{ModuleId, Sink, Source};
use crate::core::values::{ParamValue, Parameters, SharedArray};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A placed flow module: its type, parameter bag, shared state and both
/// directions of its bindings.
#[derive(Debug, Clone)]
pub struct ModuleInstance {
    /// Unique module ID
    uid: ModuleId,
    module_type: Arc<ModuleType>,
    parameters: Parameters,
    /// Exclusively owned; aliased into compiled segments by handle
    shared_state: BTreeMap<String, SharedArray>,
    /// At most one source per input port; absent means unbound
    input_bindings: BTreeMap<String, Source>,
    output_sinks: BTreeMap<String, BTreeSet<Sink>>,
    initialized: bool,
}

impl ModuleInstance {
    pub(crate) fn new(uid: ModuleId, module_type: Arc<ModuleType>, parameters: Parameters) -> Self {
        Self {
            uid,
            module_type,
            parameters,
            shared_state: BTreeMap::new(),
            input_bindings: BTreeMap::new(),
            output_sinks: BTreeMap::new(),
            initialized: false,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.uid
    }

    pub fn module_type(&self) -> &Arc<ModuleType> {
        &self.module_type
    }

    pub fn type_name(&self) -> &str {
        &self.module_type.name
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub(crate) fn set_parameter(&mut self, name: &str, value: ParamValue) -> FlowResult<()> {
        if !self.module_type.accepts_parameter(name) {
            return Err(FlowError::UnknownParameter {
                module: self.uid,
                name: name.to_string(),
            });
        }
        self.parameters.insert(name.to_string(), value);
        Ok(())
    }

    pub fn shared_state(&self) -> &BTreeMap<String, SharedArray> {
        &self.shared_state
    }

    /// Shared array by name, failing with `UnknownSharedState`
    pub fn shared(&self, name: &str) -> FlowResult<&SharedArray> {
        self.shared_state
            .get(name)
            .ok_or_else(|| FlowError::UnknownSharedState {
                module: self.uid,
                name: name.to_string(),
            })
    }

    /// Install a shared array, returning the handle it replaced
    pub(crate) fn install_shared(&mut self, name: &str, array: SharedArray) -> Option<SharedArray> {
        self.shared_state.insert(name.to_string(), array)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Run the type's init function if it has not run yet.
    ///
    /// Returns whether anything ran. A failing init leaves the instance
    /// uninitialised so the next compilation retries it.
    pub(crate) fn ensure_initialized(&mut self) -> FlowResult<bool> {
        if self.initialized {
            return Ok(false);
        }
        if let Some(init) = self.module_type.init.clone() {
            let mut staged = self.shared_state.clone();
            let mut ctx = InitContext {
                module_id: self.uid,
                parameters: &self.parameters,
                shared_state: &mut staged,
            };
            init(&mut ctx).map_err(|err| match err {
                FlowError::ModuleFailed { .. } => err,
                other => FlowError::ModuleFailed {
                    module: self.uid,
                    message: other.to_string(),
                },
            })?;
            self.shared_state = staged;
        }
        self.initialized = true;
        Ok(true)
    }

    /// Source bound to an input port
    pub fn input_binding(&self, port: &str) -> Option<&Source> {
        self.input_bindings.get(port)
    }

    pub fn input_bindings(&self) -> &BTreeMap<String, Source> {
        &self.input_bindings
    }

    /// Sinks fed by an output port
    pub fn output_sinks(&self, port: &str) -> impl Iterator<Item = &Sink> {
        self.output_sinks.get(port).into_iter().flatten()
    }

    pub fn all_output_sinks(&self) -> &BTreeMap<String, BTreeSet<Sink>> {
        &self.output_sinks
    }

    pub(crate) fn bind_input(&mut self, port: &str, source: Source) {
        self.input_bindings.insert(port.to_string(), source);
    }

    pub(crate) fn unbind_input(&mut self, port: &str) -> Option<Source> {
        self.input_bindings.remove(port)
    }

    pub(crate) fn add_sink(&mut self, port: &str, sink: Sink) {
        self.output_sinks
            .entry(port.to_string())
            .or_default()
            .insert(sink);
    }

    pub(crate) fn remove_sink(&mut self, port: &str, sink: &Sink) -> bool {
        let Some(sinks) = self.output_sinks.get_mut(port) else {
            return false;
        };
        let removed = sinks.remove(sink);
        if sinks.is_empty() {
            self.output_sinks.remove(port);
        }
        removed
    }

    /// Modules feeding this one
    pub fn dependencies(&self) -> BTreeSet<ModuleId> {
        self.input_bindings
            .values()
            .filter_map(|source| match source {
                Source::ModuleOutput(id, _) => Some(*id),
                Source::ExternalDataSource(_) => None,
            })
            .collect()
    }

    /// Modules fed by this one
    pub fn dependents(&self) -> BTreeSet<ModuleId> {
        self.output_sinks
            .values()
            .flatten()
            .filter_map(|sink| match sink {
                Sink::ModuleInput(id, _) => Some(*id),
                Sink::ExternalDataTarget(_) => None,
            })
            .collect()
    }

    /// External-target keys written by this module, with the writing port
    pub fn target_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.output_sinks.iter().flat_map(|(port, sinks)| {
            sinks.iter().filter_map(move |sink| match sink {
                Sink::ExternalDataTarget(key) => Some((port.as_str(), key.as_str())),
                Sink::ModuleInput(..) => None,
            })
        })
    }

    pub fn writes_target(&self) -> bool {
        self.target_keys().next().is_some()
    }

    pub fn reads_source(&self) -> bool {
        self.input_bindings
            .values()
            .any(|source| matches!(source, Source::ExternalDataSource(_)))
    }

    /// Whether any output port has at least one sink
    pub fn is_output_connected(&self) -> bool {
        self.output_sinks.values().any(|sinks| !sinks.is_empty())
    }

    /// Whether every declared input port is bound
    pub fn is_fully_bound(&self) -> bool {
        self.module_type
            .input_ports
            .iter()
            .all(|port| self.input_bindings.contains_key(&port.name))
    }
}
