//! # NCPA calibration run
//!
//! A run walks through the stages
//! `Built -> Aggregated -> Projected -> Applied -> Reaggregated -> Evaluated -> Emitted`;
//! without a projection the corrected snapshot is the base snapshot.

use crate::{
    aggregator::Aggregator,
    applier,
    metric::{Evaluator, NamedMetric, OutputSpec},
    model::OpticalSystem,
    projector::{ProjectionReport, Projector},
    validation::{Issues, Registry},
    Config, Error, Result,
};
use serde::Serialize;
use std::fmt;

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Built,
    Aggregated,
    Projected,
    Applied,
    Reaggregated,
    Evaluated,
    Emitted,
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::Built => "built",
            Stage::Aggregated => "aggregated",
            Stage::Projected => "projected",
            Stage::Applied => "applied",
            Stage::Reaggregated => "re-aggregated",
            Stage::Evaluated => "evaluated",
            Stage::Emitted => "emitted",
        };
        write!(f, "{stage}")
    }
}

/// Simulation outcome
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    /// output metrics, in configuration order
    pub outputs: Vec<NamedMetric>,
    pub projection: Option<ProjectionReport>,
}
impl SimulationResult {
    /// Returns the first output named `name`
    pub fn get(&self, name: &str) -> Option<&NamedMetric> {
        self.outputs.iter().find(|o| o.name == name)
    }
}
impl fmt::Display for SimulationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.projection {
            writeln!(
                f,
                "Projection: cond={:.3e}, lambda={:.1e}, residual {:.3e} -> {:.3e}",
                p.condition_number, p.regularization, p.residual_before, p.residual_after
            )?;
        }
        for o in &self.outputs {
            match o.value.as_scalar() {
                Some(value) => writeln!(f, " - {:<24}: {:.6e}", o.name, value)?,
                None => writeln!(f, " - {:<24}: {:?}", o.name, o.value)?,
            }
        }
        Ok(())
    }
}

/// Validated simulation
#[derive(Debug, Clone)]
pub struct Simulation {
    model: OpticalSystem,
    evaluator: Evaluator,
    projector: Option<Projector>,
}
impl Simulation {
    /// Validates the configuration and builds the optical system
    ///
    /// Every configuration issue, model or outputs or projection, is reported at once.
    pub fn new(config: &Config) -> Result<Self> {
        let mut issues = Issues::default();
        let registry = Registry::new(config, &mut issues);
        let model = OpticalSystem::build(config, &registry, &mut issues);
        let mut unsupported = vec![];
        let outputs: Vec<_> = config
            .outputs
            .iter()
            .map(|o| OutputSpec::build(o, config, &registry, &mut issues, &mut unsupported))
            .collect();
        let projector = config
            .projection
            .as_ref()
            .map(|p| Projector::build(p, config, &registry, &mut issues));
        issues.into_result()?;
        let model = model?.ok_or_else(|| Error::ConfigValidation(vec![]))?;
        if let Some(feature) = unsupported.into_iter().next() {
            return Err(Error::UnsupportedFeature(feature));
        }
        let outputs = outputs.into_iter().flatten().collect();
        let projector = projector.flatten();
        log::info!("{}", Stage::Built);
        Ok(Self {
            model,
            evaluator: Evaluator::new(outputs),
            projector,
        })
    }
    /// Base optical system snapshot
    pub fn model(&self) -> &OpticalSystem {
        &self.model
    }
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
    pub fn projector(&self) -> Option<&Projector> {
        self.projector.as_ref()
    }
    /// Runs the calibration with noise streams derived from `seed`
    pub fn run(&self, seed: u64) -> Result<SimulationResult> {
        let mut aggregator = Aggregator::new(&self.model);
        log::info!("{}", Stage::Aggregated);
        let (corrected, projection) = match &self.projector {
            Some(projector) => {
                let report = projector.project(&mut aggregator, seed)?;
                log::info!("{}", Stage::Projected);
                let corrected = applier::apply_all(&self.model, &report.commands)?;
                log::info!("{}", Stage::Applied);
                (corrected, Some(report))
            }
            None => (self.model.clone(), None),
        };
        let mut aggregator = Aggregator::new(&corrected);
        log::info!("{}", Stage::Reaggregated);
        let outputs = self.evaluator.evaluate(&mut aggregator, seed)?;
        log::info!("{}", Stage::Evaluated);
        let result = SimulationResult {
            outputs,
            projection,
        };
        log::info!("{}", Stage::Emitted);
        Ok(result)
    }
}

/// Runs the NCPA calibration simulation described by `config`
pub fn run_simulation(config: &Config, seed: u64) -> Result<SimulationResult> {
    Simulation::new(config)?.run(seed)
}
