//! # Light propagation
//!
//! A propagation model maps the modes of an optical element conjugated at some
//! altitude onto the pupil modes seen by a source.
//! Only [geometric](Geometric) propagation is available.

use crate::{
    config::ModalBasis,
    model::SourceNode,
    modes::{self, Mode},
    Error, NumericError, Result,
};
use nalgebra as na;
use rao::{Line, Vec2D, Vec3D};
use std::fmt;

/// Number of pupil samples across the diameter used to fit layer footprints
const N_SIDE: usize = 32;

/// Conjugation of a disturbance or a DM
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    /// conjugation altitude [m]
    pub altitude: f64,
    /// basis or metapupil radius [m]
    pub radius: f64,
}
impl Layer {
    pub fn new(altitude: f64, radius: f64) -> Self {
        Self { altitude, radius }
    }
}

/// Centre and radius, in layer normalized units, of the pupil footprint of `source` on `layer`
///
/// The footprint of a source at altitude `H` in direction `theta`, on a layer at
/// altitude `h`, is a disk centred on `h theta` of radius `R(1-h/H)`.
pub fn footprint(layer: &Layer, source: &SourceNode, pupil_radius: f64) -> ((f64, f64), f64) {
    let h = layer.altitude;
    let centre = (
        h * source.direction.0 / layer.radius,
        h * source.direction.1 / layer.radius,
    );
    let cone = if source.altitude.is_finite() {
        1. - h / source.altitude
    } else {
        1.
    };
    (centre, pupil_radius * cone / layer.radius)
}

/// Line of sight from the pupil point `p` [m] towards `source`
pub fn line_of_sight(p: &Vec2D, source: &SourceNode) -> Line {
    let (x, y) = source.direction;
    if source.altitude.is_finite() {
        let h = source.altitude;
        Line::new_from_two_points(&Vec3D::new(p.x, p.y, 0.), &Vec3D::new(h * x, h * y, h))
    } else {
        Line::new(p.x, x, p.y, y)
    }
}

/// Interface to light propagation models
pub trait Propagation: fmt::Debug + Send + Sync {
    /// Model name
    fn name(&self) -> &'static str;
    /// Returns the `n_mode x n_mode` matrix mapping the modes of `layer` onto the
    /// pupil modes seen from `source`
    fn influence(&self, layer: &Layer, source: &SourceNode) -> na::DMatrix<f64>;
}

/// Builds the propagation model named `name`
pub fn from_name(name: &str, basis: &ModalBasis) -> Result<Box<dyn Propagation>> {
    match name {
        "geometric" => Ok(Box::new(Geometric::new(basis)?)),
        "fresnel" => Err(Error::UnsupportedFeature(
            "Fresnel propagation is not implemented".into(),
        )),
        _ => Err(Error::UnsupportedFeature(format!(
            "unknown propagation model `{name}`"
        ))),
    }
}

/// Geometric propagation
///
/// Lines of sight from pupil samples towards the source read the layer modes at
/// the layer altitude; the samples are then projected onto the pupil modes.
pub struct Geometric {
    basis: ModalBasis,
    samples: Vec<Vec2D>,
    pupil_modes_pinv: na::DMatrix<f64>,
}
impl fmt::Debug for Geometric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geometric")
            .field("basis", &self.basis)
            .field("n_sample", &self.samples.len())
            .finish()
    }
}
impl Geometric {
    pub fn new(basis: &ModalBasis) -> Result<Self> {
        let r = basis.pupil_radius;
        let samples: Vec<Vec2D> = modes::pupil_grid(N_SIDE)
            .into_iter()
            .map(|p| Vec2D::new(r * p.x, r * p.y))
            .collect();
        let pupil = Layer::new(0., r);
        let measurements: Vec<_> = samples
            .iter()
            .map(|p| rao::Measurement::Phase {
                line: Line::new(p.x, 0., p.y, 0.),
            })
            .collect();
        let pupil_modes_pinv = modes::interaction(&measurements, &Self::modes(basis, &pupil))
            .pseudo_inverse(0f64)
            .map_err(|e| NumericError::Solver(e.to_string()))?;
        Ok(Self {
            basis: *basis,
            samples,
            pupil_modes_pinv,
        })
    }
    fn modes(basis: &ModalBasis, layer: &Layer) -> Vec<Mode> {
        modes::layer_modes(basis.n_mode, layer.altitude, layer.radius)
    }
    /// Centre and radius of the footprint in layer normalized coordinates
    pub fn footprint(&self, layer: &Layer, source: &SourceNode) -> ((f64, f64), f64) {
        footprint(layer, source, self.basis.pupil_radius)
    }
}
impl Propagation for Geometric {
    fn name(&self) -> &'static str {
        "geometric"
    }
    fn influence(&self, layer: &Layer, source: &SourceNode) -> na::DMatrix<f64> {
        let (centre, scale) = self.footprint(layer, source);
        if centre == (0., 0.) && scale == 1. {
            return na::DMatrix::identity(self.basis.n_mode, self.basis.n_mode);
        }
        let measurements: Vec<_> = self
            .samples
            .iter()
            .map(|p| rao::Measurement::Phase {
                line: line_of_sight(p, source),
            })
            .collect();
        &self.pupil_modes_pinv * modes::interaction(&measurements, &Self::modes(&self.basis, layer))
    }
}
