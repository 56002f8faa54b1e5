//! Serializable records of a connection graph.
//!
//! Records carry structure, parameters and shared-state contents only;
//! compiled artifacts are always rebuilt cold after loading.

use crate::core::components::registry::PortRegistry;
use crate::core::connections::graph::ConnectionGraph;
use crate::core::error::FlowResult;
use crate::core::types::{ModuleId, Source};
use crate::core::values::{Parameters, SharedArray};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Persisted form of one module instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub uid: ModuleId,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub shared_state: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub initialized: bool,
    /// Input port -> source
    #[serde(default)]
    pub input_bindings: BTreeMap<String, Source>,
    /// Output port -> external-target keys written from it
    #[serde(default)]
    pub target_sinks: BTreeMap<String, Vec<String>>,
}

/// Persisted form of a whole graph, modules in uid order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub modules: Vec<ModuleRecord>,
}

impl GraphRecord {
    pub fn from_graph(graph: &ConnectionGraph) -> Self {
        let modules = graph
            .modules()
            .map(|instance| {
                let mut target_sinks: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (port, key) in instance.target_keys() {
                    target_sinks
                        .entry(port.to_string())
                        .or_default()
                        .push(key.to_string());
                }
                ModuleRecord {
                    uid: instance.id(),
                    module_type: instance.type_name().to_string(),
                    parameters: instance.parameters().clone(),
                    shared_state: instance
                        .shared_state()
                        .iter()
                        .map(|(name, array)| (name.clone(), array.to_vec()))
                        .collect(),
                    initialized: instance.is_initialized(),
                    input_bindings: instance.input_bindings().clone(),
                    target_sinks,
                }
            })
            .collect();
        Self { modules }
    }

    /// Rebuild a graph. Modules are created first, then every binding is
    /// replayed through the validating connect calls.
    pub fn to_graph(&self, registry: Arc<PortRegistry>) -> FlowResult<ConnectionGraph> {
        let mut graph = ConnectionGraph::new(registry);
        for record in &self.modules {
            graph.add_module_with_uid(record.uid, &record.module_type, record.parameters.clone())?;
            let instance = graph.module_mut(record.uid)?;
            for (name, values) in &record.shared_state {
                instance.install_shared(name, SharedArray::new(values.clone()));
            }
            instance.set_initialized(record.initialized);
        }

        for record in &self.modules {
            for (port, source) in &record.input_bindings {
                match source {
                    Source::ExternalDataSource(key) => {
                        graph.connect_external_source(key, record.uid, port)?
                    }
                    Source::ModuleOutput(src, src_port) => {
                        graph.connect(*src, src_port, record.uid, port)?
                    }
                }
            }
            for (port, keys) in &record.target_sinks {
                for key in keys {
                    graph.connect_external_target(record.uid, port, key)?;
                }
            }
        }
        log::debug!("Restored graph of {} modules", graph.len());
        Ok(graph)
    }

    pub fn to_json(&self) -> FlowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> FlowResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
