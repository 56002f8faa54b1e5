pub use super::port_specs::{PortDim, PortSpec, PortType};

use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::kernel::{BuildContext, Expr};
use crate::core::types::ModuleId;
use crate::core::values::{ParamValue, Parameters, SharedArray, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Symbolic build function of a compilable module: one expression per output port
pub type BuildFn = Arc<dyn Fn(&BuildContext<'_>) -> FlowResult<Vec<Expr>> + Send + Sync>;

/// Step function of an interpreted module: one value per output port
pub type RunFn = Arc<dyn Fn(&RunContext<'_>) -> FlowResult<Vec<Value>> + Send + Sync>;

/// One-shot initialisation, run before the first compilation of an instance
pub type InitFn = Arc<dyn Fn(&mut InitContext<'_>) -> FlowResult<()> + Send + Sync>;

/// Whether a module type can be fused into a compiled segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Compilable,
    Interpreted,
}

/// Behaviour attached to a module type
#[derive(Clone)]
pub enum Behavior {
    Compilable(BuildFn),
    Interpreted(RunFn),
}

impl Behavior {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Behavior::Compilable(_) => ModuleKind::Compilable,
            Behavior::Interpreted(_) => ModuleKind::Interpreted,
        }
    }
}

/// Context handed to an interpreted module's step function
pub struct RunContext<'a> {
    pub module_id: ModuleId,
    pub(crate) input_names: &'a [String],
    pub(crate) inputs: &'a [Value],
    pub parameters: &'a Parameters,
    pub shared_state: &'a BTreeMap<String, SharedArray>,
}

impl<'a> RunContext<'a> {
    /// Value bound to the named input port
    pub fn input(&self, port: &str) -> FlowResult<&Value> {
        self.input_names
            .iter()
            .position(|name| name == port)
            .and_then(|idx| self.inputs.get(idx))
            .ok_or_else(|| FlowError::UnresolvedInput {
                module: self.module_id,
                port: port.to_string(),
            })
    }

    /// Input values in declared port order
    pub fn inputs(&self) -> &[Value] {
        self.inputs
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn shared(&self, name: &str) -> FlowResult<&SharedArray> {
        self.shared_state
            .get(name)
            .ok_or_else(|| FlowError::UnknownSharedState {
                module: self.module_id,
                name: name.to_string(),
            })
    }

    /// Build a module failure for this instance
    pub fn fail(&self, message: impl Into<String>) -> FlowError {
        FlowError::ModuleFailed {
            module: self.module_id,
            message: message.into(),
        }
    }
}

/// Context handed to an init function
pub struct InitContext<'a> {
    pub module_id: ModuleId,
    pub parameters: &'a Parameters,
    pub(crate) shared_state: &'a mut BTreeMap<String, SharedArray>,
}

impl<'a> InitContext<'a> {
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    /// Install a shared-state array under `name`
    pub fn set_shared(&mut self, name: &str, array: SharedArray) {
        self.shared_state.insert(name.to_string(), array);
    }

    pub fn shared(&self, name: &str) -> Option<&SharedArray> {
        self.shared_state.get(name)
    }
}

/// Immutable description of a flow module type
#[derive(Clone)]
pub struct ModuleType {
    /// Type name
    pub name: String,
    /// Input port specifications, in declared order
    pub input_ports: Vec<PortSpec>,
    /// Output port specifications, in declared order
    pub output_ports: Vec<PortSpec>,
    /// Declared parameter names; `None` accepts any parameter
    pub parameter_names: Option<Vec<String>>,
    pub behavior: Behavior,
    pub init: Option<InitFn>,
}

impl ModuleType {
    /// Create a compilable module type from a symbolic build function
    pub fn compilable<F>(
        name: &str,
        input_ports: Vec<PortSpec>,
        output_ports: Vec<PortSpec>,
        build: F,
    ) -> Self
    where
        F: Fn(&BuildContext<'_>) -> FlowResult<Vec<Expr>> + Send + Sync + 'static,
    {
        Self::with_behavior(name, input_ports, output_ports, Behavior::Compilable(Arc::new(build)))
    }

    /// Create an interpreted module type from an eager step function
    pub fn interpreted<F>(
        name: &str,
        input_ports: Vec<PortSpec>,
        output_ports: Vec<PortSpec>,
        run: F,
    ) -> Self
    where
        F: Fn(&RunContext<'_>) -> FlowResult<Vec<Value>> + Send + Sync + 'static,
    {
        Self::with_behavior(name, input_ports, output_ports, Behavior::Interpreted(Arc::new(run)))
    }

    pub fn with_behavior(
        name: &str,
        input_ports: Vec<PortSpec>,
        output_ports: Vec<PortSpec>,
        behavior: Behavior,
    ) -> Self {
        Self {
            name: name.to_string(),
            input_ports: input_ports
                .into_iter()
                .map(|p| PortSpec { port_type: PortType::Input, ..p })
                .collect(),
            output_ports: output_ports
                .into_iter()
                .map(|p| PortSpec { port_type: PortType::Output, ..p })
                .collect(),
            parameter_names: None,
            behavior,
            init: None,
        }
    }

    /// Restrict the accepted parameter names
    pub fn with_parameters(mut self, names: &[&str]) -> Self {
        self.parameter_names = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Attach an init function
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut InitContext<'_>) -> FlowResult<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    pub fn kind(&self) -> ModuleKind {
        self.behavior.kind()
    }

    pub fn is_compilable(&self) -> bool {
        self.kind() == ModuleKind::Compilable
    }

    /// Get all input port names
    pub fn input_port_names(&self) -> Vec<&str> {
        self.input_ports.iter().map(|p| p.name.as_str()).collect()
    }

    /// Get all output port names
    pub fn output_port_names(&self) -> Vec<&str> {
        self.output_ports.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn input_port(&self, name: &str) -> Option<&PortSpec> {
        self.input_ports.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortSpec> {
        self.output_ports.iter().find(|p| p.name == name)
    }

    /// Check if an input port exists
    pub fn has_input_port(&self, name: &str) -> bool {
        self.input_port(name).is_some()
    }

    /// Check if an output port exists
    pub fn has_output_port(&self, name: &str) -> bool {
        self.output_port(name).is_some()
    }

    /// Direction of the named port, if declared
    pub fn port_type(&self, name: &str) -> Option<PortType> {
        if self.has_input_port(name) {
            Some(PortType::Input)
        } else if self.has_output_port(name) {
            Some(PortType::Output)
        } else {
            None
        }
    }

    pub fn accepts_parameter(&self, name: &str) -> bool {
        self.parameter_names
            .as_ref()
            .map_or(true, |names| names.iter().any(|n| n == name))
    }
}

impl std::fmt::Debug for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleType")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("inputs", &self.input_port_names())
            .field("outputs", &self.output_port_names())
            .field("parameters", &self.parameter_names)
            .field("has_init", &self.init.is_some())
            .finish()
    }
}
