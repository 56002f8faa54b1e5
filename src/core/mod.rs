pub mod components;
pub mod connections;
pub mod engine;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod subgraph;
pub mod types;
pub mod values;
pub mod world;

#[cfg(test)]
mod tests;
