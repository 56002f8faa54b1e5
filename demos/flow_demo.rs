use flowsim::{
    ArrayWorldAdapter, EngineConfig, Expr, FlowEngine, ModuleId, ModuleType, ParamValue,
    Parameters, PortRegistry, PortSpec, SharedArray, SubgraphOptions, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

fn build_registry() -> Result<PortRegistry, Box<dyn std::error::Error>> {
    let mut registry = PortRegistry::new();

    // Element-wise affine gain with weights and bias drawn once at init time
    registry.register(
        ModuleType::compilable(
            "Gain",
            vec![PortSpec::input("inputs")],
            vec![PortSpec::output("outputs")],
            |ctx| Ok(vec![ctx.input("inputs")? * ctx.shared("weights")? + ctx.shared("bias")?]),
        )
        .with_parameters(&["size", "spread"])
        .with_init(|ctx| {
            let size = ctx.parameter("size").and_then(ParamValue::as_f64).unwrap_or(1.0) as usize;
            let spread = ctx.parameter("spread").and_then(ParamValue::as_f64).unwrap_or(0.1);
            ctx.set_shared("weights", SharedArray::random_normal(size, 1.0, spread));
            ctx.set_shared("bias", SharedArray::random_uniform(size));
            Ok(())
        }),
    )?;

    registry.register(ModuleType::compilable(
        "Rectify",
        vec![PortSpec::input("inputs")],
        vec![PortSpec::output("outputs")],
        |ctx| Ok(vec![ctx.input("inputs")?.relu()]),
    ))?;

    registry.register(
        ModuleType::compilable(
            "Squash",
            vec![PortSpec::input("inputs")],
            vec![PortSpec::output("outputs")],
            |ctx| {
                let offset = ctx.param_f64("offset", 0.0);
                let squashed = (ctx.input("inputs")? + Expr::constant(offset)).tanh();
                if ctx.param_bool("invert") {
                    Ok(vec![-squashed])
                } else {
                    Ok(vec![squashed])
                }
            },
        )
        .with_parameters(&["offset", "invert"]),
    )?;

    // Eager step: clamp to [lo, hi], [-1, 1] unless "bounds" says otherwise
    registry.register(
        ModuleType::interpreted(
            "Clip",
            vec![PortSpec::input("inputs")],
            vec![PortSpec::output("outputs")],
            |ctx| {
                let (lo, hi) = match ctx.parameter("bounds").and_then(ParamValue::as_numbers) {
                    Some(&[lo, hi]) if lo <= hi => (lo, hi),
                    Some(_) => return Err(ctx.fail("bounds must be [lo, hi] with lo <= hi")),
                    None => (-1.0, 1.0),
                };
                Ok(vec![ctx.input("inputs")?.map(|x| x.clamp(lo, hi))?])
            },
        )
        .with_parameters(&["bounds"]),
    )?;

    Ok(registry)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .init();

    println!("Starting flow graph demo");

    let registry = Arc::new(build_registry()?);
    let config = EngineConfig::new().with_target_baseline(0.0);
    let mut engine = FlowEngine::with_config(registry, config);

    let mut gain_params = Parameters::new();
    gain_params.insert("size".to_string(), ParamValue::from(3.0));
    gain_params.insert("spread".to_string(), ParamValue::from(0.2));
    let gain = engine.add_module("Gain", gain_params)?;
    let rectify = engine.add_module("Rectify", Parameters::new())?;
    let clip = engine.add_module("Clip", Parameters::new())?;
    let squash = engine.add_module("Squash", Parameters::new())?;

    engine.connect_external_source("sensor", gain, "inputs")?;
    engine.connect_ports(gain.output("outputs"), rectify.input("inputs"))?;
    engine.connect_ports(rectify.output("outputs"), clip.input("inputs"))?;
    engine.connect_ports(clip.output("outputs"), squash.input("inputs"))?;
    engine.connect_external_target(squash, "outputs", "motor")?;

    let mut world = ArrayWorldAdapter::new()
        .with_source("sensor", vec![0.0; 3])
        .with_target("motor", 3);

    let pipeline = engine.pipeline_for(gain)?;
    println!(
        "Pipeline: {} stages, {} fused segments",
        pipeline.stages().len(),
        pipeline.segment_count()
    );
    println!("Gain weights: {:?}", engine.shared_state(gain, "weights")?);

    let root = engine.component_of(gain)?.root().unwrap_or(squash);
    let mut activation: HashMap<ModuleId, f64> = HashMap::new();
    for step in 0..6 {
        let t = step as f64;
        world.set_source("sensor", vec![t * 0.5 - 1.0, t * 0.25, -t])?;
        activation.insert(root, if step == 3 { 0.0 } else { 1.0 });

        if step == 2 {
            engine.set_parameter(clip, "bounds", vec![-0.5, 2.0])?;
        }
        if step == 4 {
            engine.set_parameter(squash, "offset", 0.5)?;
            engine.set_parameter(squash, "invert", true)?;
        }

        let report = engine.step(&mut world, &activation);
        println!(
            "Step {}: executed={} idle={} errors={} motor={:?}",
            report.step,
            report.executed.len(),
            report.idle.len(),
            report.errors.len(),
            world.target("motor").unwrap_or_default()
        );
    }
    println!("Segment fusions so far: {}", engine.build_count());

    // Standalone function over the rectify/clip/squash tail
    let tail = engine.compile_subgraph(&[rectify, clip, squash], SubgraphOptions::strict())?;
    let out = tail.call(&[Value::array(vec![-2.0, 0.25, 4.0])])?;
    println!(
        "Subgraph {:?} -> {:?}: {:?}",
        tail.parameter_names(),
        tail.output_names(),
        out
    );

    let copies = engine.duplicate_subgraph(&[gain, rectify])?;
    println!("Duplicated {} modules", copies.len());

    let json = engine.to_record().to_json()?;
    println!("Graph record is {} bytes of JSON", json.len());

    Ok(())
}
