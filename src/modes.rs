//! # Zernike modal basis
//!
//! Noll-ordered, RMS-normalized Zernike modes evaluated with the `zernike` crate
//! and read through `rao` lines of sight.
//! Mode `#0` of a modal vector is Noll index `j=1` (piston), `#1` is tip (`x`),
//! `#2` is tilt (`y`) and so on.

use nalgebra as na;
use rao::{Line, Sampleable, Sampler, Vec2D};

/// Noll indices `(j, n, m)` of the first `n_mode` Zernike modes
pub fn jnm(n_mode: usize) -> Vec<(u32, u32, u32)> {
    let mut n_radial_order = 0;
    while n_radial_order * (n_radial_order + 1) / 2 < n_mode {
        n_radial_order += 1;
    }
    let (j, n, m) = zernike::jnm(n_radial_order as u32);
    let mut jnm: Vec<_> = j
        .into_iter()
        .zip(n)
        .zip(m)
        .map(|((j, n), m)| (j, n, m))
        .collect();
    jnm.sort_unstable();
    jnm.truncate(n_mode);
    jnm
}

/// Zernike mode of a layer conjugated at `altitude` and defined over a disk of `radius`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mode {
    jnm: (u32, u32, u32),
    altitude: f64,
    radius: f64,
}
impl Mode {
    pub fn new(jnm: (u32, u32, u32), altitude: f64, radius: f64) -> Self {
        Self {
            jnm,
            altitude,
            radius,
        }
    }
    /// Value at point `p` [m] of the layer
    pub fn at(&self, p: &Vec2D) -> f64 {
        let (j, n, m) = self.jnm;
        zernike::zernike(j, n, m, p.norm() / self.radius, p.y.atan2(p.x))
    }
}
impl Sampleable for Mode {
    fn sample(&self, line: &Line) -> f64 {
        self.at(&line.position_at_altitude(self.altitude))
    }
}

/// The first `n_mode` modes of a layer at `altitude` with a metapupil of `radius`
pub fn layer_modes(n_mode: usize, altitude: f64, radius: f64) -> Vec<Mode> {
    jnm(n_mode)
        .into_iter()
        .map(|jnm| Mode::new(jnm, altitude, radius))
        .collect()
}

/// Matrix of the `modes` (columns) read by the `measurements` (rows)
pub fn interaction(measurements: &[rao::Measurement], modes: &[Mode]) -> na::DMatrix<f64> {
    na::DMatrix::from_fn(measurements.len(), modes.len(), |i, j| {
        measurements[i].sample(&modes[j])
    })
}

/// Square grid of `n_side x n_side` cell centres spanning `[-1,1]`, restricted to the unit disk
///
/// Points are ordered row by row (`y` outer, `x` inner).
pub fn pupil_grid(n_side: usize) -> Vec<Vec2D> {
    let x = Vec2D::linspread(&Vec2D::new(-1., 0.), &Vec2D::new(1., 0.), n_side as u32);
    let y = Vec2D::linspread(&Vec2D::new(0., -1.), &Vec2D::new(0., 1.), n_side as u32);
    y.iter()
        .flat_map(|y| x.iter().map(move |x| x.clone() + y))
        .filter(|p| p.norm() <= 1.)
        .collect()
}
