//! # Tomographic projector
//!
//! Fits the DM command updates that cancel the calibration residuals measured in
//! several directions, minimizing
//! `sum_d w_d |r_d - sum_k M_dk c_k|^2 + lambda |c|^2`.

use crate::{
    aggregator::Aggregator,
    applier::DmCommand,
    config::{self, Config, PhaseSampling, SensorKind},
    model::{Element, OpticalSystem},
    sensor::stream_seed,
    validation::{Issues, Registry},
    ModalVector, NumericError, Result,
};
use nalgebra as na;
use serde::Serialize;
use std::collections::HashSet;

/// First noise stream of the reconstruction measurements
const PROJECTION_STREAM: u64 = 1 << 32;

/// Residual and DM influences in one calibration direction
#[derive(Debug, Clone)]
pub struct DirectionTerm {
    pub weight: f64,
    pub residual: ModalVector,
    /// one `n_mode x n_mode` influence block per fitted DM
    pub influences: Vec<na::DMatrix<f64>>,
}

/// Regularized least squares parameters
#[derive(Debug, Clone, Copy)]
pub struct LeastSquares {
    pub regularization: f64,
    pub max_condition: f64,
}
impl Default for LeastSquares {
    fn default() -> Self {
        Self {
            regularization: 1e-6,
            max_condition: 1e12,
        }
    }
}

/// Least squares solution
#[derive(Debug, Clone)]
pub struct Solution {
    /// command update of each fitted DM
    pub update: Vec<ModalVector>,
    pub condition_number: f64,
    /// weighted residual norm before the update
    pub residual_before: f64,
    /// weighted residual norm after the update
    pub residual_after: f64,
}

/// Solves the regularized weighted least squares problem
///
/// The normal equations `(A'WA + lambda I) x = A'Wb` are solved with a SVD; the
/// call fails if the condition number of the normal matrix is larger than
/// `ls.max_condition`.
pub fn solve(terms: &[DirectionTerm], ls: LeastSquares) -> Result<Solution> {
    let n_dm = terms.first().map_or(0, |t| t.influences.len());
    let n_mode = terms.first().map_or(0, |t| t.residual.len());
    if n_dm == 0 || n_mode == 0 {
        return Err(NumericError::Solver("empty least squares problem".into()).into());
    }
    let n_row = terms.len() * n_mode;
    let n_col = n_dm * n_mode;
    let mut a = na::DMatrix::<f64>::zeros(n_row, n_col);
    let mut wa = na::DMatrix::<f64>::zeros(n_row, n_col);
    let mut b = na::DVector::<f64>::zeros(n_row);
    for (d, term) in terms.iter().enumerate() {
        if term.influences.len() != n_dm || term.residual.len() != n_mode {
            return Err(NumericError::Solver(format!(
                "direction #{d} has inconsistent dimensions"
            ))
            .into());
        }
        for i in 0..n_mode {
            let row = d * n_mode + i;
            b[row] = term.residual[i];
            for (k, m) in term.influences.iter().enumerate() {
                for j in 0..n_mode {
                    a[(row, k * n_mode + j)] = m[(i, j)];
                    wa[(row, k * n_mode + j)] = term.weight * m[(i, j)];
                }
            }
        }
    }
    let normal = wa.transpose() * &a
        + na::DMatrix::<f64>::identity(n_col, n_col) * ls.regularization;
    let rhs = wa.transpose() * &b;

    let svd = normal.svd(true, true);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    let condition_number = max_sv / min_sv;
    log::info!("normal matrix condition number: {condition_number:e}");
    if !(condition_number <= ls.max_condition) {
        return Err(NumericError::IllConditioned {
            condition_number,
            max_condition: ls.max_condition,
        }
        .into());
    }
    let x = svd
        .solve(&rhs, 0f64)
        .map_err(|e| NumericError::Solver(e.to_string()))?;

    let weighted_norm = |r: &na::DVector<f64>| {
        terms
            .iter()
            .enumerate()
            .map(|(d, t)| {
                t.weight
                    * (0..n_mode)
                        .map(|i| r[d * n_mode + i] * r[d * n_mode + i])
                        .sum::<f64>()
            })
            .sum::<f64>()
            .sqrt()
    };
    let residual_before = weighted_norm(&b);
    let residual_after = weighted_norm(&(&b - &a * &x));

    let update = (0..n_dm)
        .map(|k| ModalVector::from_iterator(n_mode, (0..n_mode).map(|j| x[k * n_mode + j])))
        .collect();
    Ok(Solution {
        update,
        condition_number,
        residual_before,
        residual_after,
    })
}

/// Outcome of a projection
#[derive(Debug, Clone, Serialize)]
pub struct ProjectionReport {
    /// new commands of the fitted DMs
    pub commands: Vec<DmCommand>,
    pub condition_number: f64,
    pub regularization: f64,
    pub residual_before: f64,
    pub residual_after: f64,
}

/// Tomographic projector
#[derive(Debug, Clone)]
pub struct Projector {
    sensor: usize,
    directions: Vec<(usize, f64)>,
    dms: Vec<usize>,
    model_based: Vec<bool>,
    ls: LeastSquares,
    noisy: bool,
}
impl Projector {
    /// Resolves the projection against the configuration, recording any issue
    pub(crate) fn build(
        projection: &config::Projection,
        config: &Config,
        registry: &Registry,
        issues: &mut Issues,
    ) -> Option<Self> {
        let owner = "projection";
        let sensor = registry.sensor(&projection.sensor);
        match sensor.map(|i| &config.sensors[i]) {
            None => issues.unknown_reference(owner, "sensor", &projection.sensor),
            Some(s) => {
                if !matches!(
                    s.kind,
                    SensorKind::Phase {
                        sampling: PhaseSampling::Modal
                    }
                ) {
                    issues.invalid(
                        owner,
                        format!("sensor `{}` does not report modal coefficients", s.id),
                    );
                }
            }
        }
        if projection.directions.is_empty() {
            issues.invalid(owner, "at least one calibration direction is required");
        }
        let directions: Vec<_> = projection
            .directions
            .iter()
            .filter_map(|d| {
                if !(d.weight >= 0.) || !d.weight.is_finite() {
                    issues.invalid(
                        owner,
                        format!("invalid weight {} for `{}`", d.weight, d.source),
                    );
                }
                let source = registry.source(&d.source);
                match (source, sensor) {
                    (None, _) => issues.unknown_reference(owner, "source", &d.source),
                    (Some(_), Some(i)) if !config.sensors[i].sees.contains(&d.source) => {
                        issues.push(crate::ValidationIssue::NotVisible {
                            sensor: projection.sensor.clone(),
                            source_id: d.source.clone(),
                        })
                    }
                    _ => (),
                }
                source.map(|s| (s, d.weight))
            })
            .collect();
        let dms: Vec<usize> = if projection.dms.is_empty() {
            (0..config.dms.len()).collect()
        } else {
            let mut fitted = HashSet::new();
            projection
                .dms
                .iter()
                .filter_map(|id| match registry.dm(id) {
                    None => {
                        issues.unknown_reference(owner, "DM", id);
                        None
                    }
                    Some(k) if !fitted.insert(k) => {
                        issues.invalid(owner, format!("DM `{id}` is fitted more than once"));
                        None
                    }
                    k => k,
                })
                .collect()
        };
        if config.dms.is_empty() {
            issues.invalid(owner, "there is no DM to fit");
        }
        let mut model_based = vec![false; dms.len()];
        let mut listed = HashSet::new();
        for id in &projection.model_based {
            match registry.dm(id) {
                None => issues.unknown_reference(owner, "model-based DM", id),
                Some(k) if !listed.insert(k) => {
                    issues.invalid(owner, format!("model-based DM `{id}` is listed more than once"))
                }
                Some(k) => match dms.iter().position(|&fitted| fitted == k) {
                    Some(i) => model_based[i] = true,
                    None => issues.invalid(owner, format!("model-based DM `{id}` is not fitted")),
                },
            }
        }
        if !(projection.regularization >= 0.) || !projection.regularization.is_finite() {
            issues.invalid(
                owner,
                format!(
                    "regularization must be non-negative, found {}",
                    projection.regularization
                ),
            );
        }
        if !(projection.max_condition > 0.) {
            issues.invalid(
                owner,
                format!(
                    "maximum condition number must be positive, found {}",
                    projection.max_condition
                ),
            );
        }
        sensor.map(|sensor| Self {
            sensor,
            directions,
            dms,
            model_based,
            ls: LeastSquares {
                regularization: projection.regularization,
                max_condition: projection.max_condition,
            },
            noisy: projection.noisy,
        })
    }
    /// Least squares parameters
    pub fn least_squares(&self) -> LeastSquares {
        self.ls
    }
    /// Assembles the residual and the DM influences of every calibration direction
    pub fn terms(
        &self,
        aggregator: &mut Aggregator,
        seed: u64,
    ) -> Result<Vec<DirectionTerm>> {
        let model = aggregator.model();
        let sensor = &model.sensors()[self.sensor];
        let mut terms = vec![];
        for (d, &(source, weight)) in self.directions.iter().enumerate() {
            let modes = aggregator.effective_modes_at(source, self.sensor);
            let measurement = sensor.measure(
                &modes,
                model.sources()[source].flux,
                stream_seed(seed, PROJECTION_STREAM + d as u64),
            )?;
            let mut residual = measurement.get(self.noisy).clone();
            let mut influences = vec![];
            for (&k, &model_based) in self.dms.iter().zip(&self.model_based) {
                let dm = &model.dms()[k];
                let measured = model.is_contributor(Element::Dm(k), source, self.sensor);
                let influence = if measured || model_based {
                    aggregator.influence(Element::Dm(k), source) * dm.gain
                } else {
                    log::warn!(
                        "DM `{}` is not seen in direction `{}`: unconstrained",
                        dm.id,
                        model.sources()[source].id
                    );
                    na::DMatrix::zeros(modes.len(), modes.len())
                };
                if model_based {
                    if measured {
                        log::warn!(
                            "model-based DM `{}` is illuminated in direction `{}`",
                            dm.id,
                            model.sources()[source].id
                        );
                    } else {
                        residual -= &influence * &model.commands()[k];
                    }
                }
                influences.push(influence);
            }
            terms.push(DirectionTerm {
                weight,
                residual,
                influences,
            });
        }
        Ok(terms)
    }
    /// Solves for the DM commands cancelling the calibration residuals
    pub fn project(&self, aggregator: &mut Aggregator, seed: u64) -> Result<ProjectionReport> {
        let terms = self.terms(aggregator, seed)?;
        let solution = solve(&terms, self.ls)?;
        let model: &OpticalSystem = aggregator.model();
        log::info!(
            "projection residual: {:.3e} -> {:.3e}",
            solution.residual_before,
            solution.residual_after
        );
        let commands = self
            .dms
            .iter()
            .zip(&solution.update)
            .map(|(&k, update)| DmCommand {
                dm: model.dms()[k].id.clone(),
                command: (&model.commands()[k] + update).as_slice().to_vec(),
            })
            .collect();
        Ok(ProjectionReport {
            commands,
            condition_number: solution.condition_number,
            regularization: self.ls.regularization,
            residual_before: solution.residual_before,
            residual_after: solution.residual_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use approx::assert_abs_diff_eq;

    fn matrix(n: usize, seed: f64) -> na::DMatrix<f64> {
        na::DMatrix::from_fn(n, n, |i, j| {
            ((i * n + j) as f64 * seed).sin() + if i == j { 2. } else { 0. }
        })
    }

    #[test]
    fn matches_direct_least_squares() {
        let n = 4;
        let terms = vec![
            DirectionTerm {
                weight: 1.,
                residual: na::DVector::from_vec(vec![1., -2., 0.5, 0.3]),
                influences: vec![matrix(n, 0.7)],
            },
            DirectionTerm {
                weight: 1.,
                residual: na::DVector::from_vec(vec![0.2, 1., -1., 0.]),
                influences: vec![matrix(n, 1.3)],
            },
        ];
        let solution = solve(
            &terms,
            LeastSquares {
                regularization: 1e-12,
                max_condition: 1e12,
            },
        )
        .unwrap();

        let mut a = na::DMatrix::<f64>::zeros(2 * n, n);
        let mut b = na::DVector::<f64>::zeros(2 * n);
        for (d, t) in terms.iter().enumerate() {
            for i in 0..n {
                b[d * n + i] = t.residual[i];
                for j in 0..n {
                    a[(d * n + i, j)] = t.influences[0][(i, j)];
                }
            }
        }
        let x = a.pseudo_inverse(0f64).unwrap() * b;
        for j in 0..n {
            assert_abs_diff_eq!(solution.update[0][j], x[j], epsilon = 1e-8);
        }
        assert!(solution.residual_after <= solution.residual_before);
    }

    #[test]
    fn weights_arbitrate_conflicting_directions() {
        // both directions see the same DM but ask for different corrections
        let n = 3;
        let m = matrix(n, 0.7);
        let terms = vec![
            DirectionTerm {
                weight: 1.,
                residual: na::DVector::from_vec(vec![1., 0.5, -1.]),
                influences: vec![m.clone()],
            },
            DirectionTerm {
                weight: 3.,
                residual: na::DVector::from_vec(vec![-1., 0.2, 2.]),
                influences: vec![m.clone()],
            },
        ];
        let solution = solve(
            &terms,
            LeastSquares {
                regularization: 1e-12,
                max_condition: 1e12,
            },
        )
        .unwrap();

        let a = na::DMatrix::<f64>::from_fn(2 * n, n, |i, j| m[(i % n, j)]);
        let b = na::DVector::<f64>::from_fn(2 * n, |i, _| terms[i / n].residual[i % n]);
        let w = na::DMatrix::<f64>::from_diagonal(&na::DVector::from_fn(2 * n, |i, _| {
            terms[i / n].weight
        }));
        let x = (a.transpose() * &w * &a).try_inverse().unwrap() * a.transpose() * &w * &b;
        for j in 0..n {
            assert_abs_diff_eq!(solution.update[0][j], x[j], epsilon = 1e-8);
        }

        // the fitted wavefront is the weighted mean of the residuals
        let fit = &m * &solution.update[0];
        let mean = (&terms[0].residual + &terms[1].residual * 3.) / 4.;
        for i in 0..n {
            assert_abs_diff_eq!(fit[i], mean[i], epsilon = 1e-8);
        }
        let misfit = |t: &DirectionTerm| (&t.residual - &fit).norm();
        assert_abs_diff_eq!(misfit(&terms[0]), 3. * misfit(&terms[1]), epsilon = 1e-8);
    }

    #[test]
    fn exact_fit_cancels_residual() {
        let terms = vec![DirectionTerm {
            weight: 2.,
            residual: na::DVector::from_vec(vec![1., 2., 3.]),
            influences: vec![na::DMatrix::identity(3, 3)],
        }];
        let solution = solve(&terms, LeastSquares::default()).unwrap();
        assert_abs_diff_eq!(solution.update[0][2], 3., epsilon = 1e-5);
        assert_abs_diff_eq!(solution.residual_after, 0., epsilon = 1e-5);
        assert_abs_diff_eq!(solution.residual_before, (2f64 * 14.).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn degenerate_dms_are_ill_conditioned() {
        let terms = vec![DirectionTerm {
            weight: 1.,
            residual: na::DVector::from_vec(vec![1., 0.]),
            influences: vec![na::DMatrix::identity(2, 2), na::DMatrix::identity(2, 2)],
        }];
        let ls = LeastSquares {
            regularization: 1e-20,
            max_condition: 1e12,
        };
        assert!(matches!(
            solve(&terms, ls),
            Err(Error::Numeric(NumericError::IllConditioned { .. }))
        ));
        let solution = solve(&terms, LeastSquares::default()).unwrap();
        // the regularization splits the correction evenly
        assert_abs_diff_eq!(solution.update[0][0], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(solution.update[1][0], 0.5, epsilon = 1e-5);
    }
}
