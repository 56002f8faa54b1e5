// Tests for FlowEngine bookkeeping, partitioning and stepping
#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use crate::core::engine::FlowEngine;
    use crate::core::error::FlowError;
    use crate::core::execution::EngineConfig;
    use crate::core::types::{Binding, ModuleId, Sink, Source};
    use crate::core::values::Value;
    use crate::core::world::{ArrayWorldAdapter, WorldAdapter};
    use std::collections::{BTreeSet, HashMap};
    use uuid::Uuid;

    fn uid(n: u128) -> ModuleId {
        ModuleId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn test_binding_bookkeeping() {
        let mut engine = engine();
        let a = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Add", no_params()).unwrap();
        engine.connect_external_source("x", a, "inputs").unwrap();
        engine.connect(a, "outputs", b, "a").unwrap();
        engine.connect_external_source("x", b, "b").unwrap();
        engine.connect_external_target(b, "sum", "y").unwrap();

        let module_b = engine.module(b).unwrap();
        assert_eq!(
            module_b.input_binding("a"),
            Some(&Source::ModuleOutput(a, "outputs".to_string()))
        );
        assert_eq!(
            module_b.input_binding("b"),
            Some(&Source::ExternalDataSource("x".to_string()))
        );
        assert!(engine
            .module(a)
            .unwrap()
            .output_sinks("outputs")
            .any(|sink| *sink == Sink::ModuleInput(b, "a".to_string())));
        assert_eq!(engine.dependencies(b).unwrap(), BTreeSet::from([a]));
        assert!(engine.dependencies(a).unwrap().is_empty());
        assert!(engine.is_output_connected(a).unwrap());
        assert!(engine.is_output_connected(b).unwrap());
        assert_eq!(engine.bindings().len(), 4);
        assert!(engine.bindings().contains(&Binding::new(
            Source::ModuleOutput(b, "sum".to_string()),
            Sink::ExternalDataTarget("y".to_string()),
        )));
    }

    #[test]
    fn test_connect_validation() {
        let mut engine = engine();
        let a = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Double", no_params()).unwrap();
        let ghost = ModuleId::new();

        assert_eq!(
            engine.connect(ghost, "outputs", b, "inputs").unwrap_err(),
            FlowError::UnknownModule(ghost)
        );
        assert!(matches!(
            engine.connect(a, "missing", b, "inputs"),
            Err(FlowError::PortNotFound { .. })
        ));
        assert!(matches!(
            engine.connect(a, "inputs", b, "inputs"),
            Err(FlowError::PortDirectionMismatch { .. })
        ));
        assert!(matches!(
            engine.connect(a, "outputs", b, "outputs"),
            Err(FlowError::PortDirectionMismatch { .. })
        ));

        engine.connect(a, "outputs", b, "inputs").unwrap();
        assert!(matches!(
            engine.connect_external_source("x", b, "inputs"),
            Err(FlowError::PortAlreadyBound { .. })
        ));
        assert!(matches!(
            engine.connect(b, "outputs", a, "inputs"),
            Err(FlowError::CyclicDependency(_))
        ));
        assert!(matches!(
            engine.connect(a, "outputs", a, "inputs"),
            Err(FlowError::CyclicDependency(_))
        ));

        engine.connect_external_target(b, "outputs", "y").unwrap();
        assert!(matches!(
            engine.connect_external_target(a, "outputs", "y"),
            Err(FlowError::PortAlreadyBound { .. })
        ));
        // Fan-out from one output is fine
        engine.connect_external_target(b, "outputs", "z").unwrap();
    }

    #[test]
    fn test_add_module_validation() {
        let mut engine = engine();
        assert_eq!(
            engine.add_module("Nope", no_params()).unwrap_err(),
            FlowError::UnknownModuleType("Nope".to_string())
        );
        assert!(matches!(
            engine.add_module("Scale", params(&[("gain", 2.0)])),
            Err(FlowError::UnknownParameter { .. })
        ));

        let id = uid(7);
        engine.add_module_with_uid(id, "Double", no_params()).unwrap();
        assert_eq!(
            engine.add_module_with_uid(id, "Double", no_params()).unwrap_err(),
            FlowError::DuplicateModule(id)
        );

        let scale = engine.add_module("Scale", no_params()).unwrap();
        assert!(matches!(
            engine.set_parameter(scale, "gain", 1.0),
            Err(FlowError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_disconnect() {
        let mut engine = engine();
        let a = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Double", no_params()).unwrap();
        engine.connect_external_source("x", a, "inputs").unwrap();
        engine.connect(a, "outputs", b, "inputs").unwrap();
        engine.connect_external_target(b, "outputs", "y").unwrap();
        assert_eq!(engine.components().len(), 1);

        engine.disconnect(a, "outputs", b, "inputs").unwrap();
        assert!(engine.module(b).unwrap().input_binding("inputs").is_none());
        assert!(!engine.is_output_connected(a).unwrap());
        assert_eq!(engine.components().len(), 2);
        assert!(matches!(
            engine.disconnect(a, "outputs", b, "inputs"),
            Err(FlowError::BindingNotFound(_))
        ));

        engine.disconnect_external_source("x", a, "inputs").unwrap();
        engine.disconnect_external_target(b, "outputs", "y").unwrap();
        assert!(engine.bindings().is_empty());
        assert!(matches!(
            engine.disconnect_external_target(b, "outputs", "y"),
            Err(FlowError::BindingNotFound(_))
        ));
        // The key is free for another writer again
        engine.connect_external_target(a, "outputs", "y").unwrap();
    }

    #[test]
    fn test_remove_module_clears_bindings() {
        let mut engine = engine();
        let a = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Double", no_params()).unwrap();
        let c = engine.add_module("Double", no_params()).unwrap();
        engine.connect_external_source("x", a, "inputs").unwrap();
        engine.connect(a, "outputs", b, "inputs").unwrap();
        engine.connect(b, "outputs", c, "inputs").unwrap();
        engine.connect_external_target(c, "outputs", "y").unwrap();
        engine.pipeline_for(a).unwrap();

        let removed = engine.remove_module(b).unwrap();
        assert_eq!(removed.id(), b);
        assert_eq!(engine.module(b).unwrap_err(), FlowError::UnknownModule(b));
        assert!(!engine.is_output_connected(a).unwrap());
        assert!(engine.module(c).unwrap().input_binding("inputs").is_none());
        assert!(engine
            .bindings()
            .iter()
            .all(|binding| binding.source != Source::ModuleOutput(b, "outputs".to_string())));
        assert_eq!(engine.module_ids().len(), 2);
        assert_eq!(engine.compiler().cached_pipelines(), 0);
        assert!(engine.remove_module(b).is_err());
    }

    #[test]
    fn test_partition_marks_unanchored_singleton() {
        let mut engine = engine();
        let (a, b, c, d, e) = (uid(1), uid(2), uid(3), uid(4), uid(5));
        for id in [a, b, c, d, e] {
            engine.add_module_with_uid(id, "Double", no_params()).unwrap();
        }
        engine.connect_external_source("x", a, "inputs").unwrap();
        engine.connect(a, "outputs", c, "inputs").unwrap();
        engine.connect_external_target(c, "outputs", "y").unwrap();
        engine.connect_external_source("x", b, "inputs").unwrap();
        engine.connect(b, "outputs", d, "inputs").unwrap();
        engine.connect_external_target(d, "outputs", "z").unwrap();

        let components = engine.components();
        assert_eq!(components.len(), 3);
        assert_eq!(components[0].members(), &[a, c][..]);
        assert_eq!(components[1].members(), &[b, d][..]);
        assert_eq!(components[2].members(), &[e][..]);
        assert!(components[0].is_anchored());
        assert!(components[1].is_anchored());
        assert!(!components[2].is_anchored());
        assert_eq!(components[0].root(), Some(c));
        assert_eq!(components[1].target_keys(), &["z".to_string()][..]);

        // Sharing a source key does not merge components
        assert_ne!(engine.component_of(a).unwrap(), engine.component_of(b).unwrap());

        let mut world = ArrayWorldAdapter::new()
            .with_source("x", vec![1.0])
            .with_target("y", 1)
            .with_target("z", 1);
        let report = engine.step(&mut world, &always_on);
        assert_eq!(report.executed, vec![c, d]);
        assert_eq!(report.dormant, 1);
        assert_eq!(report.step, 1);
        assert_eq!(engine.current_step(), 1);
    }

    #[test]
    fn test_writer_upstream_of_reader_is_unanchored() {
        let mut engine = engine();
        let writer = engine.add_module("Double", no_params()).unwrap();
        let reader = engine.add_module("Add", no_params()).unwrap();
        engine.connect_external_target(writer, "outputs", "y").unwrap();
        engine.connect(writer, "outputs", reader, "a").unwrap();
        engine.connect_external_source("x", reader, "b").unwrap();

        // Source and target sit in one component, but no path leads from one to the other
        let component = engine.component_of(reader).unwrap();
        assert_eq!(component.len(), 2);
        assert!(!component.is_anchored());
        assert_eq!(component.root(), Some(writer));

        let mut world = ArrayWorldAdapter::new()
            .with_source("x", vec![1.0])
            .with_target("y", 1);
        let report = engine.step(&mut world, &always_on);
        assert!(report.executed.is_empty());
        assert_eq!(report.dormant, 1);
    }

    #[test]
    fn test_activation_gates_each_root() {
        let config = EngineConfig::new().with_target_baseline(-1.0);
        let mut engine = FlowEngine::with_config(registry(), config);
        let a = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Bisect", no_params()).unwrap();
        engine.connect_external_source("x", a, "inputs").unwrap();
        engine.connect_external_target(a, "outputs", "y").unwrap();
        engine.connect_external_source("x", b, "inputs").unwrap();
        engine.connect_external_target(b, "outputs", "z").unwrap();

        let mut world = ArrayWorldAdapter::new()
            .with_source("x", vec![4.0, 8.0])
            .with_target("y", 2)
            .with_target("z", 2);
        let mut activation = HashMap::new();
        activation.insert(a, 1.0);
        activation.insert(b, 0.0);
        let report = engine.step(&mut world, &activation);
        assert_eq!(report.executed, vec![a]);
        assert_eq!(report.idle, vec![b]);
        assert_eq!(world.target("y"), Some(&[8.0, 16.0][..]));
        assert_eq!(world.target("z"), Some(&[-1.0, -1.0][..]));

        // Missing activation counts as off
        activation.remove(&a);
        engine.step(&mut world, &activation);
        assert_eq!(world.target("y"), Some(&[-1.0, -1.0][..]));
    }

    #[test]
    fn test_failing_component_does_not_block_others() {
        let mut engine = engine();
        let ok = engine.add_module("Double", no_params()).unwrap();
        let bad = engine.add_module("Fail", no_params()).unwrap();
        engine.connect_external_source("x", ok, "inputs").unwrap();
        engine.connect_external_target(ok, "outputs", "y").unwrap();
        engine.connect_external_source("x", bad, "inputs").unwrap();
        engine.connect_external_target(bad, "outputs", "z").unwrap();

        let mut world = ArrayWorldAdapter::new()
            .with_source("x", vec![3.0])
            .with_target("y", 1)
            .with_target("z", 1);
        world.write_target("z", &Value::scalar(5.0)).unwrap();

        let report = engine.step(&mut world, &always_on);
        assert!(!report.is_clean());
        assert_eq!(report.executed, vec![ok]);
        assert!(matches!(
            report.error_for(bad),
            Some(FlowError::ModuleFailed { module, .. }) if *module == bad
        ));
        assert_eq!(world.target("y"), Some(&[6.0][..]));
        assert_eq!(world.target("z"), Some(&[0.0][..]));
    }

    #[test]
    fn test_missing_world_key_is_reported() {
        let mut engine = engine();
        let a = engine.add_module("Double", no_params()).unwrap();
        engine.connect_external_source("x", a, "inputs").unwrap();
        engine.connect_external_target(a, "outputs", "y").unwrap();

        let mut world = ArrayWorldAdapter::new().with_target("y", 1);
        let report = engine.step(&mut world, &always_on);
        assert_eq!(
            report.error_for(a),
            Some(&FlowError::UnknownDataKey("x".to_string()))
        );
    }
}
