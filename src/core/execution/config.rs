//! Configuration for flow-graph execution
//!
//! Controls what idle components leave behind in the data-target vector,
//! how subgraph compilation treats unbound inputs by default, and whether
//! compiled artifacts are cached between steps.

use crate::core::subgraph::BoundaryMode;
use serde::{Deserialize, Serialize};

/// Configuration for a [`FlowEngine`](crate::core::engine::FlowEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Value written to every target key of a component that does not run
    pub target_baseline: f64,
    /// Boundary handling used by `compile_subgraph` when none is given
    pub default_boundary_mode: BoundaryMode,
    /// Keep compiled segments and pipelines between requests.
    /// When disabled every execution compiles from scratch.
    pub pipeline_cache: bool,
}

impl EngineConfig {
    /// Create a configuration with default values
    ///
    /// Targets reset to 0.0, subgraphs compile strictly, caching is on
    pub fn new() -> Self {
        Self {
            target_baseline: 0.0,
            default_boundary_mode: BoundaryMode::Strict,
            pipeline_cache: true,
        }
    }

    /// Set the baseline written to targets of idle components
    pub fn with_target_baseline(mut self, baseline: f64) -> Self {
        self.target_baseline = baseline;
        self
    }

    pub fn with_default_boundary_mode(mut self, mode: BoundaryMode) -> Self {
        self.default_boundary_mode = mode;
        self
    }

    /// Enable or disable artifact caching
    pub fn with_pipeline_cache(mut self, enabled: bool) -> Self {
        self.pipeline_cache = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
