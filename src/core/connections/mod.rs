pub mod graph;
pub mod partition;
pub mod port_validator;

pub use graph::ConnectionGraph;
pub use partition::{Component, ComponentPartitioner, Partition};
pub use port_validator::PortValidator;
