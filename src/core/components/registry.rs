use crate::core::components::module::{
    Behavior, BuildFn, InitContext, InitFn, ModuleKind, ModuleType, RunContext, RunFn,
};
use crate::core::components::port_specs::{PortDim, PortSpec};
use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::kernel::{BuildContext, Expr};
use crate::core::values::Value;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Immutable table of module types, built once and shared by every engine
#[derive(Debug, Default, Clone)]
pub struct PortRegistry {
    types: HashMap<String, Arc<ModuleType>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Register a module type
    pub fn register(&mut self, module_type: ModuleType) -> FlowResult<()> {
        if self.types.contains_key(&module_type.name) {
            return Err(FlowError::Metadata(format!(
                "Module type '{}' already exists",
                module_type.name
            )));
        }
        self.types
            .insert(module_type.name.clone(), Arc::new(module_type));
        Ok(())
    }

    /// Builder-style registration
    pub fn with_type(mut self, module_type: ModuleType) -> FlowResult<Self> {
        self.register(module_type)?;
        Ok(self)
    }

    /// Build a registry from a JSON metadata document.
    ///
    /// The document maps type names to [`ModuleMetadata`]; function names are
    /// resolved against `library`.
    pub fn from_metadata_json(json: &str, library: &BehaviorLibrary) -> FlowResult<Self> {
        let entries: BTreeMap<String, ModuleMetadata> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for (name, metadata) in entries {
            registry.register(metadata.into_module_type(&name, library)?)?;
        }
        log::debug!("Loaded {} module types from metadata", registry.len());
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModuleType>> {
        self.types.get(name)
    }

    /// Look up a type, failing with `UnknownModuleType`
    pub fn lookup(&self, name: &str) -> FlowResult<&Arc<ModuleType>> {
        self.get(name)
            .ok_or_else(|| FlowError::UnknownModuleType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Named behaviours referenced from module metadata
#[derive(Default, Clone)]
pub struct BehaviorLibrary {
    build: HashMap<String, BuildFn>,
    run: HashMap<String, RunFn>,
    init: HashMap<String, InitFn>,
}

impl BehaviorLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn(&BuildContext<'_>) -> FlowResult<Vec<Expr>> + Send + Sync + 'static,
    {
        self.build.insert(name.to_string(), Arc::new(build));
        self
    }

    pub fn with_run<F>(mut self, name: &str, run: F) -> Self
    where
        F: Fn(&RunContext<'_>) -> FlowResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.run.insert(name.to_string(), Arc::new(run));
        self
    }

    pub fn with_init<F>(mut self, name: &str, init: F) -> Self
    where
        F: Fn(&mut InitContext<'_>) -> FlowResult<()> + Send + Sync + 'static,
    {
        self.init.insert(name.to_string(), Arc::new(init));
        self
    }

    fn build_fn(&self, name: &str) -> FlowResult<BuildFn> {
        self.build
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::Metadata(format!("no build function named '{}'", name)))
    }

    fn run_fn(&self, name: &str) -> FlowResult<RunFn> {
        self.run
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::Metadata(format!("no run function named '{}'", name)))
    }

    fn init_fn(&self, name: &str) -> FlowResult<InitFn> {
        self.init
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::Metadata(format!("no init function named '{}'", name)))
    }
}

/// One entry of the per-port dimensionality list: `1` for an array, `"list"`
/// for a list of arrays
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DimEntry {
    Rank(u32),
    Named(String),
}

impl DimEntry {
    fn to_port_dim(&self) -> FlowResult<PortDim> {
        match self {
            DimEntry::Rank(_) => Ok(PortDim::Array),
            DimEntry::Named(name) if name == "list" => Ok(PortDim::List),
            DimEntry::Named(name) => Err(FlowError::Metadata(format!(
                "unknown port dimensionality '{}'",
                name
            ))),
        }
    }
}

/// Declarative description of a module type as found in metadata files
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMetadata {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Inferred from the function names when absent
    #[serde(default)]
    pub kind: Option<ModuleKind>,
    #[serde(default)]
    pub parameters: Option<Vec<String>>,
    #[serde(default)]
    pub inputdims: Vec<DimEntry>,
    #[serde(default)]
    pub outputdims: Vec<DimEntry>,
    #[serde(default)]
    pub build_function_name: Option<String>,
    #[serde(default)]
    pub run_function_name: Option<String>,
    #[serde(default)]
    pub init_function_name: Option<String>,
}

impl ModuleMetadata {
    fn ports(
        names: &[String],
        dims: &[DimEntry],
        make: fn(&str) -> PortSpec,
    ) -> FlowResult<Vec<PortSpec>> {
        if !dims.is_empty() && dims.len() != names.len() {
            return Err(FlowError::Metadata(format!(
                "{} ports declared but {} dimensionalities",
                names.len(),
                dims.len()
            )));
        }
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let dim = match dims.get(idx) {
                    Some(entry) => entry.to_port_dim()?,
                    None => PortDim::Array,
                };
                Ok(make(name).with_dim(dim))
            })
            .collect()
    }

    /// Resolve this entry into a module type
    pub fn into_module_type(self, name: &str, library: &BehaviorLibrary) -> FlowResult<ModuleType> {
        let kind = match (self.kind, &self.build_function_name, &self.run_function_name) {
            (Some(kind), _, _) => kind,
            (None, Some(_), None) => ModuleKind::Compilable,
            (None, None, Some(_)) => ModuleKind::Interpreted,
            _ => {
                return Err(FlowError::Metadata(format!(
                    "module type '{}' must name exactly one of build_function_name or run_function_name",
                    name
                )))
            }
        };

        let behavior = match kind {
            ModuleKind::Compilable => {
                let fn_name = self.build_function_name.as_deref().ok_or_else(|| {
                    FlowError::Metadata(format!("compilable type '{}' has no build function", name))
                })?;
                Behavior::Compilable(library.build_fn(fn_name)?)
            }
            ModuleKind::Interpreted => {
                let fn_name = self.run_function_name.as_deref().ok_or_else(|| {
                    FlowError::Metadata(format!("interpreted type '{}' has no run function", name))
                })?;
                Behavior::Interpreted(library.run_fn(fn_name)?)
            }
        };

        let inputs = Self::ports(&self.inputs, &self.inputdims, PortSpec::input)?;
        let outputs = Self::ports(&self.outputs, &self.outputdims, PortSpec::output)?;

        let mut module_type = ModuleType::with_behavior(name, inputs, outputs, behavior);
        module_type.parameter_names = self.parameters;
        if let Some(init_name) = self.init_function_name.as_deref() {
            module_type.init = Some(library.init_fn(init_name)?);
        }
        Ok(module_type)
    }
}
