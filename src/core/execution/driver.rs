use crate::core::connections::graph::ConnectionGraph;
use crate::core::connections::partition::Component;
use crate::core::error::{FlowError, FlowResult};
use crate::core::execution::compiler::SegmentCompiler;
use crate::core::execution::config::EngineConfig;
use crate::core::types::ModuleId;
use crate::core::world::{ActivationSource, WorldAdapter};

/// Outcome of one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Step number, starting at 1
    pub step: u64,
    /// Roots of components that ran
    pub executed: Vec<ModuleId>,
    /// Roots of anchored components that did not run, including failed ones
    pub idle: Vec<ModuleId>,
    /// Compile or execution failures, by component root
    pub errors: Vec<(ModuleId, FlowError)>,
    /// Number of unanchored components
    pub dormant: usize,
}

impl StepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_for(&self, root: ModuleId) -> Option<&FlowError> {
        self.errors
            .iter()
            .find(|(id, _)| *id == root)
            .map(|(_, err)| err)
    }
}

/// Drives anchored components once per step.
///
/// Each anchored component is gated by the activation of its root; a gated
/// or failing component has its target keys reset to the configured
/// baseline and never blocks the others.
#[derive(Debug, Default)]
pub struct StepDriver {
    current_step: u64,
}

impl StepDriver {
    pub fn new() -> Self {
        Self { current_step: 0 }
    }

    /// Get current step number
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Execute one step over every anchored component
    pub fn step(
        &mut self,
        graph: &mut ConnectionGraph,
        compiler: &mut SegmentCompiler,
        config: &EngineConfig,
        world: &mut dyn WorldAdapter,
        activation: &dyn ActivationSource,
    ) -> StepReport {
        self.current_step += 1;
        let components: Vec<Component> = graph.partition().components().to_vec();
        let mut report = StepReport {
            step: self.current_step,
            ..StepReport::default()
        };

        for component in &components {
            let root = match (component.is_anchored(), component.root()) {
                (true, Some(root)) => root,
                _ => {
                    report.dormant += 1;
                    continue;
                }
            };

            let active = activation.activation(root).map_or(false, |a| a > 0.0);
            if !active {
                Self::reset_targets(component, config, world, &mut report, root);
                report.idle.push(root);
                continue;
            }

            match Self::run_component(graph, compiler, component, world) {
                Ok(()) => report.executed.push(root),
                Err(err) => {
                    log::warn!("Component rooted at {} failed: {}", root, err);
                    report.errors.push((root, err));
                    Self::reset_targets(component, config, world, &mut report, root);
                    report.idle.push(root);
                }
            }
        }

        log::debug!(
            "Step {}: {} executed, {} idle, {} dormant",
            report.step,
            report.executed.len(),
            report.idle.len(),
            report.dormant
        );
        report
    }

    fn run_component(
        graph: &mut ConnectionGraph,
        compiler: &mut SegmentCompiler,
        component: &Component,
        world: &mut dyn WorldAdapter,
    ) -> FlowResult<()> {
        let pipeline = compiler.compile_component(graph, component)?;
        pipeline.run(world)
    }

    fn reset_targets(
        component: &Component,
        config: &EngineConfig,
        world: &mut dyn WorldAdapter,
        report: &mut StepReport,
        root: ModuleId,
    ) {
        for key in component.target_keys() {
            if let Err(err) = world.reset_target(key, config.target_baseline) {
                log::warn!("Could not reset datatarget '{}': {}", key, err);
                if report.error_for(root).is_none() {
                    report.errors.push((root, err));
                }
            }
        }
    }
}
