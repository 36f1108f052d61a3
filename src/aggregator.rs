//! # Wavefront aggregation
//!
//! The effective modal vector of a (direction, sensor) pair is the sum of the
//! contributions of every disturbance and DM seen by both the source and the
//! sensor, each propagated onto the pupil and scaled by its optical path sign.

use crate::{
    model::{Element, OpticalSystem},
    ModalVector, Result,
};
use nalgebra as na;
use std::collections::HashMap;

/// Effective modal vector of the `sensor` measuring the source `direction`
pub fn effective_modes(
    direction: &str,
    sensor: &str,
    model: &OpticalSystem,
) -> Result<ModalVector> {
    Aggregator::new(model).effective_modes(direction, sensor)
}

/// Wavefront aggregator over a model snapshot
///
/// Effective modal vectors and layer influences are memoized for the lifetime of
/// the aggregator.
pub struct Aggregator<'a> {
    model: &'a OpticalSystem,
    modes: HashMap<(usize, usize), ModalVector>,
    influences: HashMap<(Element, usize), na::DMatrix<f64>>,
}
impl<'a> Aggregator<'a> {
    pub fn new(model: &'a OpticalSystem) -> Self {
        Self {
            model,
            modes: HashMap::new(),
            influences: HashMap::new(),
        }
    }
    /// Model snapshot
    pub fn model(&self) -> &'a OpticalSystem {
        self.model
    }
    /// Effective modal vector of the `sensor` measuring the source `direction`
    pub fn effective_modes(&mut self, direction: &str, sensor: &str) -> Result<ModalVector> {
        let (source, sensor) = self.model.pair(direction, sensor)?;
        Ok(self.effective_modes_at(source, sensor))
    }
    /// Modal influence of `element` on the pupil modes seen by `source`
    pub fn influence(&mut self, element: Element, source: usize) -> &na::DMatrix<f64> {
        let model = self.model;
        self.influences.entry((element, source)).or_insert_with(|| {
            let layer = match element {
                Element::Disturbance(i) => &model.disturbances()[i].layer,
                Element::Dm(k) => &model.dms()[k].layer,
            };
            model
                .propagation()
                .influence(layer, &model.sources()[source])
        })
    }
    /// Effective modal vector for the (source, sensor) pair given by indices
    pub fn effective_modes_at(&mut self, source: usize, sensor: usize) -> ModalVector {
        if let Some(modes) = self.modes.get(&(source, sensor)) {
            return modes.clone();
        }
        let model = self.model;
        let mut modes = ModalVector::zeros(model.n_mode());
        for contributor in model.contributors_at(source, sensor) {
            let p = self.influence(contributor.element, source);
            modes += contributor.scale * (p * contributor.modes);
        }
        log::debug!(
            "{}@{}: |modes|={:.3e}",
            model.sensors()[sensor].id,
            model.sources()[source].id,
            modes.norm()
        );
        self.modes.insert((source, sensor), modes.clone());
        modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{
            Config, Disturbance, Dm, DmKind, ModalBasis, PhaseSampling, Sensor, Source, SourceKind,
        },
        Error,
    };
    use approx::assert_abs_diff_eq;

    fn config() -> Config {
        Config::new(ModalBasis::new(4, 4.))
            .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa", "dsm"]))
            .source(Source::new("sky", SourceKind::OnSky).sees(["ncpa", "dsm", "atm"]))
            .disturbance(
                Disturbance::zernike("ncpa", vec![0., 1., -2., 0.5]).seen_by(["cal", "sky"]),
            )
            .disturbance(Disturbance::zernike("atm", vec![0., 0., 0., 1.]).seen_by(["sky"]))
            .dm(Dm::new("dsm", DmKind::Dsm)
                .command(vec![0., 1., 0., 0.])
                .gain(2.)
                .illuminates(["sky"]))
            .sensor(
                Sensor::phase("pd", PhaseSampling::Modal)
                    .sees(["cal", "sky", "ncpa", "dsm", "atm"]),
            )
    }

    #[test]
    fn superposition() {
        let model = OpticalSystem::new(&config()).unwrap();
        let cal = effective_modes("cal", "pd", &model).unwrap();
        assert_eq!(cal.as_slice(), &[0., 1., -2., 0.5]);
        let sky = effective_modes("sky", "pd", &model).unwrap();
        assert_abs_diff_eq!(sky[1], 1. - 2., epsilon = 1e-12);
        assert_abs_diff_eq!(sky[3], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn memoized_pairs_are_identical() {
        let model = OpticalSystem::new(&config()).unwrap();
        let mut aggregator = Aggregator::new(&model);
        let a = aggregator.effective_modes("sky", "pd").unwrap();
        let b = aggregator.effective_modes("sky", "pd").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_pair() {
        let model = OpticalSystem::new(&config()).unwrap();
        match effective_modes("nowhere", "nothing", &model) {
            Err(Error::ConfigValidation(issues)) => assert_eq!(issues.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn altitude_layer_depends_on_direction() {
        let config = Config::new(ModalBasis::new(3, 4.))
            .source(Source::new("a", SourceKind::Ngs).sees(["high"]))
            .source(Source::new("b", SourceKind::Ngs).field(20., 0.).sees(["high"]))
            .disturbance(
                Disturbance::zernike("high", vec![0., 1., 0.])
                    .altitude(10e3)
                    .radius(6.)
                    .seen_by(["a", "b"]),
            )
            .sensor(Sensor::phase("pd", PhaseSampling::Modal).sees(["a", "b", "high"]));
        let model = OpticalSystem::new(&config).unwrap();
        let a = effective_modes("a", "pd", &model).unwrap();
        let b = effective_modes("b", "pd", &model).unwrap();
        assert_abs_diff_eq!(a[0], 0., epsilon = 1e-9);
        assert!(b[0] > 0.);
        assert_abs_diff_eq!(a[1], b[1], epsilon = 1e-9);
    }
}
