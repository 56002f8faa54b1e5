//! Error types for the flow-graph engine.

use crate::core::components::port_specs::PortType;
use crate::core::types::ModuleId;
use thiserror::Error;

/// Errors reported by structural mutations, compilation and execution.
///
/// None of these are transient: they describe authoring or logic mistakes and
/// are never retried by the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Port '{port}' not found on module {module}")]
    PortNotFound { module: ModuleId, port: String },

    #[error("Port '{port}' on module {module} is not an {expected} port")]
    PortDirectionMismatch {
        module: ModuleId,
        port: String,
        expected: PortType,
    },

    #[error("{endpoint} is already bound")]
    PortAlreadyBound { endpoint: String },

    #[error("Binding not found: {0}")]
    BindingNotFound(String),

    #[error("Unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("Module {0} already exists")]
    DuplicateModule(ModuleId),

    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),

    #[error("Unsupported fusion: {0}")]
    UnsupportedFusion(String),

    #[error("Input '{port}' on module {module} is unresolved")]
    UnresolvedInput { module: ModuleId, port: String },

    #[error("Unknown module type '{0}'")]
    UnknownModuleType(String),

    #[error("Module {module} has no parameter '{name}'")]
    UnknownParameter { module: ModuleId, name: String },

    #[error("Module {module} has no shared state '{name}'")]
    UnknownSharedState { module: ModuleId, name: String },

    #[error("Unknown data key '{0}'")]
    UnknownDataKey(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Module {module} failed: {message}")]
    ModuleFailed { module: ModuleId, message: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid module metadata: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;
