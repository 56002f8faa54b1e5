use crate::core::components::instance::ModuleInstance;
use crate::core::components::port_specs::{PortSpec, PortType};
use crate::core::error::{FlowError, FlowResult};

/// Port validation utilities for module instances
pub struct PortValidator;

impl PortValidator {
    /// Validate that a module has the specified output port
    pub fn validate_source_port<'a>(
        instance: &'a ModuleInstance,
        port: &str,
    ) -> FlowResult<&'a PortSpec> {
        Self::validate_port(instance, port, PortType::Output)
    }

    /// Validate that a module has the specified input port
    pub fn validate_target_port<'a>(
        instance: &'a ModuleInstance,
        port: &str,
    ) -> FlowResult<&'a PortSpec> {
        Self::validate_port(instance, port, PortType::Input)
    }

    fn validate_port<'a>(
        instance: &'a ModuleInstance,
        port: &str,
        expected: PortType,
    ) -> FlowResult<&'a PortSpec> {
        let module_type = instance.module_type();
        let found = match expected {
            PortType::Input => module_type.input_port(port),
            PortType::Output => module_type.output_port(port),
        };
        if let Some(spec) = found {
            return Ok(spec);
        }

        // Declared, but on the other side
        if module_type.port_type(port).is_some() {
            return Err(FlowError::PortDirectionMismatch {
                module: instance.id(),
                port: port.to_string(),
                expected,
            });
        }

        let valid = match expected {
            PortType::Input => module_type.input_port_names(),
            PortType::Output => module_type.output_port_names(),
        };
        log::debug!(
            "{} port '{}' not found on {} module {}. Valid {} ports: {:?}",
            expected,
            port,
            instance.type_name(),
            instance.id(),
            expected,
            valid
        );
        Err(FlowError::PortNotFound {
            module: instance.id(),
            port: port.to_string(),
        })
    }
}
