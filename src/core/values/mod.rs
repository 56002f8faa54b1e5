pub mod params;
pub mod shared;
pub mod value;

// Re-export all public types
pub use params::{ParamValue, Parameters};
pub use shared::SharedArray;
pub use value::Value;
