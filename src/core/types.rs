use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identifier of a module instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(Uuid);

impl ModuleId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (used when restoring persisted graphs)
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Create an output port handle
    pub fn output(&self, port: &str) -> OutputPort {
        OutputPort {
            module_id: *self,
            port_name: port.to_string(),
        }
    }

    /// Create an input port handle
    pub fn input(&self, port: &str) -> InputPort {
        InputPort {
            module_id: *self,
            port_name: port.to_string(),
        }
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ModuleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Handle for an output port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputPort {
    pub(crate) module_id: ModuleId,
    pub(crate) port_name: String,
}

impl OutputPort {
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Handle for an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputPort {
    pub(crate) module_id: ModuleId,
    pub(crate) port_name: String,
}

impl InputPort {
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Where an input port takes its value from.
///
/// An input port without an entry in the binding table is unbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    /// A key of the world adapter's data-source vector
    ExternalDataSource(String),
    /// An output port of another module
    ModuleOutput(ModuleId, String),
}

/// Where an output port delivers its value to. Outputs fan out to many sinks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sink {
    /// A key of the world adapter's data-target vector
    ExternalDataTarget(String),
    /// An input port of another module
    ModuleInput(ModuleId, String),
}

/// Port-qualified key used to thread values between pipeline stages
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    /// Value read from the external data-source vector
    DataSource(String),
    /// Value produced by a module output port
    Port(ModuleId, String),
    /// Value handed straight to a module input port by a subgraph caller
    Input(ModuleId, String),
    /// Contents of a shared-state array passed in by a subgraph caller
    Shared(ModuleId, String),
}

impl From<&Source> for ValueKey {
    fn from(source: &Source) -> Self {
        match source {
            Source::ExternalDataSource(key) => ValueKey::DataSource(key.clone()),
            Source::ModuleOutput(id, port) => ValueKey::Port(*id, port.clone()),
        }
    }
}

impl std::fmt::Display for ValueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKey::DataSource(key) => write!(f, "datasource:{}", key),
            ValueKey::Port(id, port) => write!(f, "{}.{}", id, port),
            ValueKey::Input(id, port) => write!(f, "{}.{} (input)", id, port),
            ValueKey::Shared(id, name) => write!(f, "{}.{} (shared)", id, name),
        }
    }
}

/// One directed edge of the connection graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Binding {
    pub source: Source,
    pub sink: Sink,
}

impl Binding {
    pub fn new(source: Source, sink: Sink) -> Self {
        Self { source, sink }
    }
}
