pub mod instance;
pub mod module;
pub mod port_specs;
pub mod registry;

// Re-export commonly used types
pub use instance::ModuleInstance;
pub use module::{
    Behavior, BuildFn, InitContext, InitFn, ModuleKind, ModuleType, RunContext, RunFn,
};
pub use port_specs::{PortDim, PortSpec, PortType};
pub use registry::{BehaviorLibrary, ModuleMetadata, PortRegistry};
