//! Boundary between the flow graph and the world it reads from and writes to.

use crate::core::error::{FlowError, FlowResult};
use crate::core::types::ModuleId;
use crate::core::values::Value;
use std::collections::{BTreeMap, HashMap};

/// Read access to the data-source vector and write access to the
/// data-target vector of a world adapter
pub trait WorldAdapter {
    fn read_source(&self, key: &str) -> FlowResult<Value>;

    fn write_target(&mut self, key: &str, value: &Value) -> FlowResult<()>;

    /// Fill a target with `baseline`
    fn reset_target(&mut self, key: &str, baseline: f64) -> FlowResult<()>;
}

/// World adapter over named, fixed-length numeric arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayWorldAdapter {
    sources: BTreeMap<String, Vec<f64>>,
    targets: BTreeMap<String, Vec<f64>>,
}

impl ArrayWorldAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a data source with initial contents
    pub fn with_source(mut self, key: &str, values: Vec<f64>) -> Self {
        self.sources.insert(key.to_string(), values);
        self
    }

    /// Declare a zero-filled data target of fixed length
    pub fn with_target(mut self, key: &str, len: usize) -> Self {
        self.targets.insert(key.to_string(), vec![0.0; len]);
        self
    }

    /// Replace a source's contents
    pub fn set_source(&mut self, key: &str, values: Vec<f64>) -> FlowResult<()> {
        let slot = self
            .sources
            .get_mut(key)
            .ok_or_else(|| FlowError::UnknownDataKey(key.to_string()))?;
        *slot = values;
        Ok(())
    }

    pub fn source(&self, key: &str) -> Option<&[f64]> {
        self.sources.get(key).map(Vec::as_slice)
    }

    pub fn target(&self, key: &str) -> Option<&[f64]> {
        self.targets.get(key).map(Vec::as_slice)
    }

    pub fn source_keys(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn target_keys(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}

impl WorldAdapter for ArrayWorldAdapter {
    fn read_source(&self, key: &str) -> FlowResult<Value> {
        self.sources
            .get(key)
            .map(|values| Value::Array(values.clone()))
            .ok_or_else(|| FlowError::UnknownDataKey(key.to_string()))
    }

    fn write_target(&mut self, key: &str, value: &Value) -> FlowResult<()> {
        let slot = self
            .targets
            .get_mut(key)
            .ok_or_else(|| FlowError::UnknownDataKey(key.to_string()))?;
        let values = value.as_array()?;
        if values.len() != slot.len() {
            return Err(FlowError::ShapeMismatch(format!(
                "datatarget '{}' holds {} values, got {}",
                key,
                slot.len(),
                values.len()
            )));
        }
        slot.copy_from_slice(values);
        Ok(())
    }

    fn reset_target(&mut self, key: &str, baseline: f64) -> FlowResult<()> {
        let slot = self
            .targets
            .get_mut(key)
            .ok_or_else(|| FlowError::UnknownDataKey(key.to_string()))?;
        slot.fill(baseline);
        Ok(())
    }
}

/// Per-root activation supplied by the surrounding simulation
pub trait ActivationSource {
    /// Activation of a component root; `None` when nothing gates it
    fn activation(&self, root: ModuleId) -> Option<f64>;
}

impl ActivationSource for HashMap<ModuleId, f64> {
    fn activation(&self, root: ModuleId) -> Option<f64> {
        self.get(&root).copied()
    }
}

impl ActivationSource for BTreeMap<ModuleId, f64> {
    fn activation(&self, root: ModuleId) -> Option<f64> {
        self.get(&root).copied()
    }
}

impl<F> ActivationSource for F
where
    F: Fn(ModuleId) -> Option<f64>,
{
    fn activation(&self, root: ModuleId) -> Option<f64> {
        self(root)
    }
}
