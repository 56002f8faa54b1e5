pub mod core;

pub use crate::core::components::{
    BehaviorLibrary, BuildFn, InitContext, ModuleInstance, ModuleType, PortDim, PortRegistry,
    PortSpec, PortType, RunContext,
};
pub use crate::core::connections::{Component, ConnectionGraph};
pub use crate::core::engine::FlowEngine;
pub use crate::core::error::{FlowError, FlowResult};
pub use crate::core::execution::{BuildContext, EngineConfig, Expr, Stage, StepReport};
pub use crate::core::persistence::GraphRecord;
pub use crate::core::subgraph::{BoundaryMode, SubgraphFunction, SubgraphOptions};
pub use crate::core::types::{ModuleId, Source, Sink, ValueKey};
pub use crate::core::values::{ParamValue, Parameters, SharedArray, Value};
pub use crate::core::world::{ActivationSource, ArrayWorldAdapter, WorldAdapter};
