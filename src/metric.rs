//! # Metric evaluator
//!
//! Turns the measurements of the configured outputs into named metric values,
//! in configuration order.

use crate::{
    aggregator::Aggregator,
    config::{self, Config, OutputKind},
    sensor::{stream_seed, Measurement, SensorModel},
    validation::{Issues, Registry},
    Result, ValidationIssue,
};
use serde::Serialize;

/// Resolved output
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub kind: OutputKind,
    /// sensor index
    pub sensor: usize,
    /// source index
    pub source: usize,
    pub unit: f64,
    pub noisy: bool,
}
impl OutputSpec {
    /// Resolves the output against the configuration
    ///
    /// Configuration issues are recorded in `issues`, unsupported output kinds in
    /// `unsupported`.
    pub(crate) fn build(
        output: &config::Output,
        config: &Config,
        registry: &Registry,
        issues: &mut Issues,
        unsupported: &mut Vec<String>,
    ) -> Option<Self> {
        let name = output.label();
        let kind = issues.parse::<OutputKind>(&name, "output kind", &output.kind);
        if kind == Some(OutputKind::ZernikeProjection) {
            unsupported.push(format!("output `{name}`: Zernike projection is not implemented"));
        }
        let sensor = registry.sensor(&output.sensor);
        if sensor.is_none() {
            issues.unknown_reference(&name, "sensor", &output.sensor);
        }
        let source = registry.source(&output.source);
        if source.is_none() {
            issues.unknown_reference(&name, "source", &output.source);
        }
        if let Some(i) = sensor {
            if source.is_some() && !config.sensors[i].sees.contains(&output.source) {
                issues.push(ValidationIssue::NotVisible {
                    sensor: output.sensor.clone(),
                    source_id: output.source.clone(),
                });
            }
        }
        if !output.unit.is_finite() {
            issues.invalid(&name, "unit conversion factor must be finite");
        }
        match (kind, sensor, source) {
            (Some(kind), Some(sensor), Some(source)) => Some(Self {
                name,
                kind,
                sensor,
                source,
                unit: output.unit,
                noisy: output.noisy,
            }),
            _ => None,
        }
    }
}

/// Metric value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Vector(Vec<f64>),
}
impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(value) => Some(*value),
            MetricValue::Vector(_) => None,
        }
    }
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            MetricValue::Scalar(_) => None,
            MetricValue::Vector(value) => Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedMetric {
    pub name: String,
    pub value: MetricValue,
}

/// Evaluates the output `spec` from the `measurement` of `sensor`
pub fn evaluate(
    spec: &OutputSpec,
    sensor: &SensorModel,
    measurement: &Measurement,
) -> Result<MetricValue> {
    let factor = sensor.unit * spec.unit;
    let data = measurement.get(spec.noisy);
    match spec.kind {
        OutputKind::RmsResidual => {
            let n = data.len();
            if n == 0 {
                return Ok(MetricValue::Scalar(0.));
            }
            let piston = if sensor.is_phase_map() {
                data.mean()
            } else {
                0.
            };
            let var = data.iter().map(|x| (x - piston).powi(2)).sum::<f64>() / n as f64;
            Ok(MetricValue::Scalar(factor * var.sqrt()))
        }
        OutputKind::MeasurementVector => Ok(MetricValue::Vector(
            data.iter().map(|x| factor * x).collect(),
        )),
        OutputKind::ZernikeProjection => Err(crate::Error::UnsupportedFeature(format!(
            "output `{}`: Zernike projection is not implemented",
            spec.name
        ))),
    }
}

/// Evaluates the `index`th output of a run seeded with `seed`
pub fn evaluate_output(
    aggregator: &mut Aggregator,
    spec: &OutputSpec,
    index: usize,
    seed: u64,
) -> Result<NamedMetric> {
    let model = aggregator.model();
    let sensor = &model.sensors()[spec.sensor];
    let modes = aggregator.effective_modes_at(spec.source, spec.sensor);
    let measurement = sensor.measure(
        &modes,
        model.sources()[spec.source].flux,
        stream_seed(seed, index as u64),
    )?;
    let value = evaluate(spec, sensor, &measurement)?;
    Ok(NamedMetric {
        name: spec.name.clone(),
        value,
    })
}

/// Evaluates a list of outputs in order
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    outputs: Vec<OutputSpec>,
}
impl Evaluator {
    pub fn new(outputs: Vec<OutputSpec>) -> Self {
        Self { outputs }
    }
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }
    /// Evaluates all the outputs
    pub fn evaluate(&self, aggregator: &mut Aggregator, seed: u64) -> Result<Vec<NamedMetric>> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, spec)| evaluate_output(aggregator, spec, i, seed))
            .collect()
    }
}
