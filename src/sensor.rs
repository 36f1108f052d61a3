//! # Wavefront sensors
//!
//! A sensor turns the effective modal vector of a (direction, sensor) pair into a
//! measurement vector through its fixed interaction matrix, and adds noise.

use crate::{
    config::{self, Lenslets, ModalBasis, NoiseModel, PhaseSampling},
    modes,
    validation::Issues,
    ModalVector, NumericError, Result,
};
use nalgebra as na;
use rao::{Line, Vec2D};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Sensor readout
#[derive(Debug, Clone)]
pub enum Readout {
    /// Shack-Hartmann slopes, all x-slopes followed by all y-slopes
    Slopes {
        n_subaperture: usize,
        interaction: na::DMatrix<f64>,
    },
    /// Modal coefficients
    Modes,
    /// Phase sampled inside the pupil
    PhaseMap { interaction: na::DMatrix<f64> },
}

/// Measurement vector with and without noise
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub noiseless: na::DVector<f64>,
    pub noisy: na::DVector<f64>,
}
impl Measurement {
    /// Returns the noisy or noiseless measurement
    pub fn get(&self, noisy: bool) -> &na::DVector<f64> {
        if noisy {
            &self.noisy
        } else {
            &self.noiseless
        }
    }
}

/// Wavefront sensor model
#[derive(Debug, Clone)]
pub struct SensorModel {
    pub id: String,
    pub readout: Readout,
    pub noise: NoiseModel,
    /// measurement unit conversion factor
    pub unit: f64,
}

impl SensorModel {
    /// Builds the sensor model, recording any configuration issue
    ///
    /// Returns `Ok(None)` if the sensor is invalid; unsupported sensor kinds are errors.
    pub(crate) fn build(
        sensor: &config::Sensor,
        basis: &ModalBasis,
        issues: &mut Issues,
    ) -> Result<Option<Self>> {
        let id = sensor.id.as_str();
        let n_mode = basis.n_mode;
        let readout = match &sensor.kind {
            config::SensorKind::SHWFS { lenslets } => match lenslets {
                Lenslets::Explicit {
                    n_subaperture,
                    interaction,
                } => {
                    if *n_subaperture == 0 {
                        issues.invalid(id, "a Shack-Hartmann WFS needs at least one subaperture");
                        None
                    } else if issues.dimension(
                        id,
                        "interaction matrix",
                        2 * n_subaperture * n_mode,
                        interaction.len(),
                    ) {
                        Some(Readout::Slopes {
                            n_subaperture: *n_subaperture,
                            interaction: na::DMatrix::from_row_slice(
                                2 * n_subaperture,
                                n_mode,
                                interaction,
                            ),
                        })
                    } else {
                        None
                    }
                }
                Lenslets::Geometric { nsubx, npoints } => {
                    if *nsubx == 0 || *npoints == 0 {
                        issues.invalid(id, "lenslet count and edge samples must be positive");
                        None
                    } else {
                        let interaction = geometric_shack_hartmann(basis, *nsubx, *npoints);
                        Some(Readout::Slopes {
                            n_subaperture: interaction.nrows() / 2,
                            interaction,
                        })
                    }
                }
            },
            config::SensorKind::Phase { sampling } => match sampling {
                PhaseSampling::Modal => Some(Readout::Modes),
                PhaseSampling::Map { nsample } if *nsample > 0 => Some(Readout::PhaseMap {
                    interaction: phase_map(basis, *nsample),
                }),
                PhaseSampling::Map { .. } => {
                    issues.invalid(id, "phase map sampling must be positive");
                    None
                }
            },
            config::SensorKind::ZernikeProjection => {
                return Err(crate::Error::UnsupportedFeature(format!(
                    "sensor `{id}`: Zernike projection sensors are not implemented"
                )))
            }
        };
        match sensor.noise {
            NoiseModel::None => (),
            NoiseModel::Gaussian { sigma } if sigma.is_finite() && sigma >= 0. => (),
            NoiseModel::Photon {
                sigma,
                reference_flux,
            } if sigma.is_finite() && sigma >= 0. && reference_flux > 0. => (),
            noise => issues.invalid(id, format!("invalid noise model {noise:?}")),
        }
        if !sensor.unit.is_finite() {
            issues.invalid(id, "unit conversion factor must be finite");
        }
        Ok(readout.map(|readout| Self {
            id: sensor.id.clone(),
            readout,
            noise: sensor.noise,
            unit: sensor.unit,
        }))
    }
    /// Number of measurements
    pub fn n_measurement(&self, n_mode: usize) -> usize {
        match &self.readout {
            Readout::Slopes { n_subaperture, .. } => 2 * n_subaperture,
            Readout::Modes => n_mode,
            Readout::PhaseMap { interaction } => interaction.nrows(),
        }
    }
    /// Checks if the sensor reports modal coefficients
    pub fn is_modal(&self) -> bool {
        matches!(self.readout, Readout::Modes)
    }
    /// Checks if the sensor samples the phase in the pupil
    pub fn is_phase_map(&self) -> bool {
        matches!(self.readout, Readout::PhaseMap { .. })
    }
    /// Noise standard deviation for a source of photon flux `flux`
    pub fn sigma(&self, flux: f64) -> f64 {
        match self.noise {
            NoiseModel::None => 0.,
            NoiseModel::Gaussian { sigma } => sigma,
            NoiseModel::Photon {
                sigma,
                reference_flux,
            } => sigma * (reference_flux / flux).sqrt(),
        }
    }
    /// Noiseless measurement
    pub fn noiseless(&self, modes: &ModalVector) -> na::DVector<f64> {
        match &self.readout {
            Readout::Slopes { interaction, .. } | Readout::PhaseMap { interaction } => {
                interaction * modes
            }
            Readout::Modes => modes.clone(),
        }
    }
    /// Measurement with noise drawn from a generator seeded with `seed`
    pub fn measure(&self, modes: &ModalVector, flux: f64, seed: u64) -> Result<Measurement> {
        let noiseless = self.noiseless(modes);
        let sigma = self.sigma(flux);
        let noisy = if sigma > 0. {
            let normal =
                Normal::new(0f64, sigma).map_err(|e| NumericError::Noise(e.to_string()))?;
            let mut rng = StdRng::seed_from_u64(seed);
            noiseless.map(|x| x + normal.sample(&mut rng))
        } else {
            noiseless.clone()
        };
        Ok(Measurement { noiseless, noisy })
    }
}

/// Measures `modal_vector` with `sensor` for a source of photon flux `flux`
pub fn measure(
    modal_vector: &ModalVector,
    sensor: &SensorModel,
    flux: f64,
    rng_seed: u64,
) -> Result<Measurement> {
    sensor.measure(modal_vector, flux, rng_seed)
}

/// Derives an independent seed for the noise stream `stream` of a run seeded with `seed`
pub fn stream_seed(seed: u64, stream: u64) -> u64 {
    // splitmix64
    let mut z = seed
        .wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Lenslet centres [m] of a `nsubx x nsubx` array spanning the pupil, restricted to the pupil
fn lenslet_centres(radius: f64, nsubx: usize) -> Vec<Vec2D> {
    let x = Vec2D::linspread(&Vec2D::new(-radius, 0.), &Vec2D::new(radius, 0.), nsubx as u32);
    let y = Vec2D::linspread(&Vec2D::new(0., -radius), &Vec2D::new(0., radius), nsubx as u32);
    y.iter()
        .flat_map(|y| x.iter().map(move |x| x.clone() + y))
        .filter(|c| c.norm() <= radius)
        .collect()
}

/// Geometric Shack-Hartmann interaction matrix
///
/// The lenslet array spans the pupil diameter with `nsubx` lenslets across;
/// lenslets centred inside the pupil are valid. Each slope is a two-edge
/// measurement of the pupil modes averaged over `npoints` points per edge, in
/// modal units per metre.
pub fn geometric_shack_hartmann(
    basis: &ModalBasis,
    nsubx: usize,
    npoints: usize,
) -> na::DMatrix<f64> {
    let radius = basis.pupil_radius;
    let width = 2. * radius / nsubx as f64;
    let centres = lenslet_centres(radius, nsubx);
    let measurements: Vec<_> = [Vec2D::x_unit(), Vec2D::y_unit()]
        .iter()
        .flat_map(|axis| {
            centres.iter().map(move |c| rao::Measurement::SlopeTwoEdge {
                central_line: Line::new(c.x, 0., c.y, 0.),
                edge_length: width,
                edge_separation: width,
                gradient_axis: axis.clone(),
                npoints: npoints as u32,
                altitude: f64::INFINITY,
            })
        })
        .collect();
    modes::interaction(&measurements, &modes::layer_modes(basis.n_mode, 0., radius))
}

/// Zernike modes sampled on a `nsample x nsample` grid restricted to the pupil
pub fn phase_map(basis: &ModalBasis, nsample: usize) -> na::DMatrix<f64> {
    let radius = basis.pupil_radius;
    let measurements: Vec<_> = modes::pupil_grid(nsample)
        .into_iter()
        .map(|p| rao::Measurement::Phase {
            line: Line::new(radius * p.x, 0., radius * p.y, 0.),
        })
        .collect();
    modes::interaction(&measurements, &modes::layer_modes(basis.n_mode, 0., radius))
}
