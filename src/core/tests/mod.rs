
mod engine_tests;
mod subgraph_tests;
