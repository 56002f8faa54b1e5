use serde::{Deserialize, Serialize};

/// Direction of a module port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Input,
    Output,
}

impl PortType {
    /// Get a human-readable description of this port type
    pub fn description(&self) -> &'static str {
        match self {
            PortType::Input => "Input port that receives a value from one source",
            PortType::Output => "Output port that fans out to any number of sinks",
        }
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::Input => write!(f, "input"),
            PortType::Output => write!(f, "output"),
        }
    }
}

/// Declared dimensionality of a port.
///
/// Fused kernels fix their shapes at build time, so two ports joined inside a
/// compiled segment must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PortDim {
    /// A flat numeric array
    #[default]
    Array,
    /// A list of numeric arrays
    List,
}

impl std::fmt::Display for PortDim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDim::Array => write!(f, "array"),
            PortDim::List => write!(f, "list"),
        }
    }
}

/// Port specification for module inputs and outputs
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    /// Port name
    pub name: String,
    /// Port direction
    pub port_type: PortType,
    /// Declared dimensionality
    pub dim: PortDim,
    /// Optional description for documentation
    pub description: Option<String>,
}

impl PortSpec {
    /// Create a new array input port
    pub fn input(name: &str) -> Self {
        Self {
            name: name.to_string(),
            port_type: PortType::Input,
            dim: PortDim::Array,
            description: None,
        }
    }

    /// Create a new array output port
    pub fn output(name: &str) -> Self {
        Self {
            name: name.to_string(),
            port_type: PortType::Output,
            dim: PortDim::Array,
            description: None,
        }
    }

    /// Declare this port as carrying a list of arrays
    pub fn list(mut self) -> Self {
        self.dim = PortDim::List;
        self
    }

    pub fn with_dim(mut self, dim: PortDim) -> Self {
        self.dim = dim;
        self
    }

    /// Add a description to this port
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}
