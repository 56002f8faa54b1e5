// Tests for subgraph compilation and duplication
#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use crate::core::connections::graph::ConnectionGraph;
    use crate::core::engine::FlowEngine;
    use crate::core::error::FlowError;
    use crate::core::subgraph::{discard_copies, SubgraphOptions};
    use crate::core::types::{ModuleId, Source};
    use crate::core::values::{ParamValue, Value};
    use crate::core::world::ArrayWorldAdapter;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn arrays(values: &[Value]) -> Vec<Vec<f64>> {
        values
            .iter()
            .map(|v| v.as_array().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_bound_inputs_become_parameters() {
        let mut engine = engine();
        let d = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Bisect", no_params()).unwrap();
        engine.connect_external_source("x", d, "inputs").unwrap();
        engine.connect(d, "outputs", b, "inputs").unwrap();
        engine.connect_external_target(b, "outputs", "y").unwrap();

        let function = engine
            .compile_subgraph(&[b, d], SubgraphOptions::strict())
            .unwrap();
        assert_eq!(function.members(), &[d, b][..]);
        assert_eq!(function.parameter_names(), vec!["inputs"]);
        assert_eq!(function.output_names(), vec!["outputs"]);
        assert_eq!(function.parameters()[0].module_id, d);
        assert_eq!(function.outputs()[0].module_id, b);

        let out = function.call(&[Value::array(vec![2.0, 4.0])]).unwrap();
        assert_eq!(arrays(&out), vec![vec![2.0, 4.0]]);
    }

    #[test]
    fn test_inputs_fed_from_outside_the_set() {
        let mut engine = engine();
        let d = engine.add_module("Double", no_params()).unwrap();
        let b = engine.add_module("Bisect", no_params()).unwrap();
        engine.connect(d, "outputs", b, "inputs").unwrap();

        let function = engine
            .compile_subgraph(&[b], SubgraphOptions::strict())
            .unwrap();
        assert_eq!(function.parameter_names(), vec!["inputs"]);
        assert_eq!(function.parameters()[0].module_id, b);
        let out = function.call(&[Value::array(vec![3.0])]).unwrap();
        assert_eq!(arrays(&out), vec![vec![1.5]]);
    }

    #[test]
    fn test_strict_and_partial_boundaries() {
        let mut engine = engine();
        let adder = engine.add_module("Add", no_params()).unwrap();
        engine.connect_external_source("x", adder, "a").unwrap();

        assert_eq!(
            engine
                .compile_subgraph(&[adder], SubgraphOptions::strict())
                .unwrap_err(),
            FlowError::UnresolvedInput {
                module: adder,
                port: "b".to_string()
            }
        );
        // The engine default is strict too
        assert!(engine
            .compile_subgraph(&[adder], SubgraphOptions::default())
            .is_err());

        let function = engine
            .compile_subgraph(&[adder], SubgraphOptions::partial())
            .unwrap();
        assert_eq!(function.parameter_names(), vec!["a", "b"]);
        assert_eq!(function.output_names(), vec!["sum"]);
        let out = function
            .call(&[Value::array(vec![1.0, 2.0]), Value::array(vec![10.0, 20.0])])
            .unwrap();
        assert_eq!(arrays(&out), vec![vec![11.0, 22.0]]);
    }

    #[test]
    fn test_colliding_names_are_qualified() {
        let mut engine = engine();
        let first = ModuleId::from_uuid(Uuid::from_u128(1));
        let second = ModuleId::from_uuid(Uuid::from_u128(2));
        engine.add_module_with_uid(first, "Double", no_params()).unwrap();
        engine.add_module_with_uid(second, "Bisect", no_params()).unwrap();

        let function = engine
            .compile_subgraph(&[first, second], SubgraphOptions::partial())
            .unwrap();
        let first_in = format!("{}.inputs", first);
        let second_in = format!("{}.inputs", second);
        assert_eq!(
            function.parameter_names(),
            vec![first_in.as_str(), second_in.as_str()]
        );
        assert_eq!(
            function.output_names(),
            vec![format!("{}.outputs", first), format!("{}.outputs", second)]
        );

        let mut args = BTreeMap::new();
        args.insert(first_in.clone(), Value::array(vec![1.0]));
        args.insert(second_in.clone(), Value::array(vec![8.0]));
        let out = function.call_named(&args).unwrap();
        assert_eq!(arrays(&out), vec![vec![2.0], vec![4.0]]);

        args.remove(&second_in);
        assert!(matches!(
            function.call_named(&args),
            Err(FlowError::InvalidArguments(_))
        ));
        args.insert("bogus".to_string(), Value::scalar(0.0));
        assert!(matches!(
            function.call_named(&args),
            Err(FlowError::InvalidArguments(_))
        ));
        assert!(matches!(
            function.call(&[Value::scalar(1.0)]),
            Err(FlowError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_interpreted_members_are_bridged() {
        let mut engine = engine();
        let d = engine.add_module("Double", no_params()).unwrap();
        let p = engine.add_module("PlusOne", no_params()).unwrap();
        let b = engine.add_module("Bisect", no_params()).unwrap();
        engine.connect(d, "outputs", p, "inputs").unwrap();
        engine.connect(p, "outputs", b, "inputs").unwrap();

        let function = engine
            .compile_subgraph(&[d, p, b], SubgraphOptions::partial())
            .unwrap();
        let kinds: Vec<bool> = function.stages().iter().map(|s| s.is_segment()).collect();
        assert_eq!(kinds, vec![true, false, true]);

        let out = function.call(&[Value::array(vec![2.0, 4.0])]).unwrap();
        assert_eq!(arrays(&out), vec![vec![2.5, 4.5]]);

        // Standalone functions never enter the step caches
        assert_eq!(engine.compiler().cached_segments(), 0);
        assert_eq!(engine.compiler().cached_pipelines(), 0);
        assert_eq!(engine.build_count(), 2);
    }

    #[test]
    fn test_shared_state_as_parameters() {
        let mut engine = engine();
        let w = engine.add_module("Weighted", no_params()).unwrap();

        let exposed = engine
            .compile_subgraph(&[w], SubgraphOptions::partial().with_shared_state())
            .unwrap();
        assert_eq!(exposed.parameter_names(), vec!["weights", "inputs"]);
        let out = exposed
            .call(&[Value::array(vec![10.0]), Value::array(vec![1.0, 2.0])])
            .unwrap();
        assert_eq!(arrays(&out), vec![vec![10.0, 20.0]]);
        assert_eq!(engine.shared_state(w, "weights").unwrap(), vec![1.0]);

        // Without exposure the function aliases the live array
        let aliased = engine
            .compile_subgraph(&[w], SubgraphOptions::partial())
            .unwrap();
        assert_eq!(aliased.parameter_names(), vec!["inputs"]);
        engine
            .mutate_shared_state(w, "weights", |weights| weights[0] = 5.0)
            .unwrap();
        let out = aliased.call(&[Value::array(vec![1.0, 2.0])]).unwrap();
        assert_eq!(arrays(&out), vec![vec![5.0, 10.0]]);
    }

    #[test]
    fn test_invalid_node_sets() {
        let mut engine = engine();
        assert!(matches!(
            engine.compile_subgraph(&[], SubgraphOptions::partial()),
            Err(FlowError::InvalidArguments(_))
        ));
        let ghost = ModuleId::new();
        assert_eq!(
            engine
                .compile_subgraph(&[ghost], SubgraphOptions::partial())
                .unwrap_err(),
            FlowError::UnknownModule(ghost)
        );
    }

    #[test]
    fn test_duplicate_is_independent() {
        let (registry, init_calls) = registry_with_counter();
        let mut engine = FlowEngine::new(registry);
        let w = engine.add_module("Weighted", params(&[("initial", 2.0)])).unwrap();
        let d = engine.add_module("Double", no_params()).unwrap();
        engine.connect_external_source("x", w, "inputs").unwrap();
        engine.connect(w, "outputs", d, "inputs").unwrap();
        engine.connect_external_target(d, "outputs", "y").unwrap();

        let mut world = ArrayWorldAdapter::new()
            .with_source("x", vec![1.0])
            .with_target("y", 1);
        engine.step(&mut world, &always_on);
        assert_eq!(world.target("y"), Some(&[4.0][..]));

        let mapping = engine.duplicate_subgraph(&[w, d]).unwrap();
        assert_eq!(mapping.len(), 2);
        let (new_w, new_d) = (mapping[&w], mapping[&d]);
        assert_eq!(engine.module_ids().len(), 4);

        let copy_w = engine.module(new_w).unwrap();
        assert_eq!(copy_w.type_name(), "Weighted");
        assert_eq!(copy_w.parameter("initial").and_then(ParamValue::as_f64), Some(2.0));
        assert!(copy_w.is_initialized());
        assert!(copy_w.input_binding("inputs").is_none());
        assert_eq!(
            engine.module(new_d).unwrap().input_binding("inputs"),
            Some(&Source::ModuleOutput(new_w, "outputs".to_string()))
        );
        assert!(!engine.is_output_connected(new_d).unwrap());

        engine
            .mutate_shared_state(w, "weights", |weights| weights[0] = 7.0)
            .unwrap();
        assert_eq!(engine.shared_state(new_w, "weights").unwrap(), vec![2.0]);

        let function = engine
            .compile_subgraph(&[new_w, new_d], SubgraphOptions::partial())
            .unwrap();
        let out = function.call(&[Value::array(vec![1.0])]).unwrap();
        assert_eq!(arrays(&out), vec![vec![4.0]]);
        assert_eq!(init_count(&init_calls), 1);

        // Writes to the copy do not reach the original either
        engine
            .mutate_shared_state(new_w, "weights", |weights| weights[0] = 9.0)
            .unwrap();
        assert_eq!(engine.shared_state(w, "weights").unwrap(), vec![7.0]);

        engine.set_parameter(w, "initial", 5.0).unwrap();
        assert_eq!(
            engine.module(new_w).unwrap().parameter("initial").and_then(ParamValue::as_f64),
            Some(2.0)
        );
        engine.set_parameter(new_w, "initial", 8.0).unwrap();
        assert_eq!(
            engine.module(w).unwrap().parameter("initial").and_then(ParamValue::as_f64),
            Some(5.0)
        );

        // The original keeps running with its own state
        engine.step(&mut world, &always_on);
        assert_eq!(world.target("y"), Some(&[14.0][..]));
    }

    #[test]
    fn test_duplicate_unknown_module_changes_nothing() {
        let mut engine = engine();
        let d = engine.add_module("Double", no_params()).unwrap();
        let ghost = ModuleId::new();
        assert_eq!(
            engine.duplicate_subgraph(&[d, ghost]).unwrap_err(),
            FlowError::UnknownModule(ghost)
        );
        assert_eq!(engine.module_ids(), vec![d]);
    }

    #[test]
    fn test_rollback_skips_missing_copies() {
        let mut graph = ConnectionGraph::new(registry());
        let a = graph.add_module("Double", no_params()).unwrap();
        let b = graph.add_module("Double", no_params()).unwrap();
        graph.connect(a, "outputs", b, "inputs").unwrap();
        let kept = graph.add_module("Add", no_params()).unwrap();

        // A missing uid in the middle does not stop the remaining removals
        let removed = discard_copies(&mut graph, vec![a, ModuleId::new(), b]);
        assert_eq!(removed, 2);
        assert_eq!(graph.module_ids(), vec![kept]);
    }
}
