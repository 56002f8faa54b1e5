pub mod compiler;
pub mod config;
pub mod driver;
pub mod execution_order;
pub mod kernel;
pub mod pipeline;

// Re-export commonly used types
pub use compiler::SegmentCompiler;
pub use config::EngineConfig;
pub use driver::{StepDriver, StepReport};
pub use execution_order::ExecutionOrderBuilder;
pub use kernel::{BinaryOp, BuildContext, Expr, FusedKernel, KernelBuilder, UnaryOp};
pub use pipeline::{CompiledPipeline, CompiledSegment, InterpretedCall, Stage, StructuralSignature};
