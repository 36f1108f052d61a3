//! # Optical system model
//!
//! Immutable snapshot of the instrument: sources, disturbances, DMs and sensors
//! linked by visibility relations keyed by entity indices.
//! The topology is shared between snapshots, only the DM commands differ.

use crate::{
    config::{self, Config, DisturbanceKind, DmKind, PathTag, SourceKind},
    propagation::{self, Layer, Propagation},
    sensor::SensorModel,
    validation::{Entity, Issues, Registry},
    Error, Result, ValidationIssue,
};
use nalgebra as na;
use skyangle::Conversion;
use std::{collections::HashSet, fmt, sync::Arc};

/// Modal coefficients in the shared Zernike basis
pub type ModalVector = na::DVector<f64>;

/// Default LGS altitude [m]
pub const LGS_ALTITUDE: f64 = 90e3;

/// Slack on the metapupil edge, in layer normalized units
const METAPUPIL_TOLERANCE: f64 = 1e-9;

/// Optical element contributing to a wavefront
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    Disturbance(usize),
    Dm(usize),
}

#[derive(Debug, Clone)]
pub struct SourceNode {
    pub id: String,
    pub kind: SourceKind,
    /// direction [rad]
    pub direction: (f64, f64),
    /// altitude [m]
    pub altitude: f64,
    pub flux: f64,
}

#[derive(Debug, Clone)]
pub struct DisturbanceNode {
    pub id: String,
    pub path: PathTag,
    pub layer: Layer,
    pub modes: ModalVector,
}

#[derive(Debug, Clone)]
pub struct DmNode {
    pub id: String,
    pub kind: DmKind,
    pub layer: Layer,
    pub gain: f64,
}

/// Modal contributor to the wavefront of a (source, sensor) pair
#[derive(Debug, Clone)]
pub struct Contributor<'a> {
    pub element: Element,
    pub id: &'a str,
    /// optical path sign and scale: `1` for disturbances, `-gain` for DMs
    pub scale: f64,
    pub layer: &'a Layer,
    pub modes: &'a ModalVector,
}

struct Topology {
    basis: config::ModalBasis,
    propagation: Box<dyn Propagation>,
    sources: Vec<SourceNode>,
    disturbances: Vec<DisturbanceNode>,
    dms: Vec<DmNode>,
    sensors: Vec<SensorModel>,
    source_sees: Vec<HashSet<Element>>,
    seen_by: Vec<HashSet<usize>>,
    illuminates: Vec<HashSet<usize>>,
    sensor_sources: Vec<HashSet<usize>>,
    sensor_elements: Vec<HashSet<Element>>,
}

/// Optical system snapshot
#[derive(Clone)]
pub struct OpticalSystem {
    topology: Arc<Topology>,
    commands: Arc<Vec<ModalVector>>,
}
impl fmt::Debug for OpticalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpticalSystem")
            .field("n_mode", &self.topology.basis.n_mode)
            .field("propagation", &self.topology.propagation.name())
            .field("sources", &self.topology.sources.len())
            .field("disturbances", &self.topology.disturbances.len())
            .field("dms", &self.topology.dms.len())
            .field("sensors", &self.topology.sensors.len())
            .finish()
    }
}
impl fmt::Display for OpticalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.topology;
        writeln!(
            f,
            "Optical system ({} modes, {} propagation):",
            t.basis.n_mode,
            t.propagation.name()
        )?;
        for s in &t.sources {
            writeln!(
                f,
                " - source {:>8} [{:>7}] ({:+.1},{:+.1})arcsec",
                s.id,
                s.kind,
                s.direction.0.to_arcsec(),
                s.direction.1.to_arcsec()
            )?;
        }
        for (d, c) in t.dms.iter().zip(self.commands.iter()) {
            writeln!(
                f,
                " - DM {:>12} [{:>4}] @{:>7.0}m |c|={:.3e}",
                d.id,
                d.kind,
                d.layer.altitude,
                c.norm()
            )?;
        }
        for s in &t.sensors {
            writeln!(f, " - sensor {:>8} {:?}", s.id, s.noise)?;
        }
        Ok(())
    }
}

/// Parses and checks the entities of the configuration
///
/// Entities that fail to parse are left out, their issues are recorded.
struct Builder<'a> {
    config: &'a Config,
    registry: &'a Registry,
    unsupported: Vec<String>,
}
impl<'a> Builder<'a> {
    fn layer(
        &self,
        owner: &str,
        altitude: f64,
        radius: Option<f64>,
        issues: &mut Issues,
    ) -> Layer {
        let radius = radius.unwrap_or(self.config.basis.pupil_radius);
        if !(radius > 0.) {
            issues.invalid(owner, format!("radius must be positive, found {radius}"));
        }
        if !(altitude >= 0.) || !altitude.is_finite() {
            issues.invalid(owner, format!("altitude must be non-negative, found {altitude}"));
        }
        Layer::new(altitude, radius)
    }
    fn sources(&self, issues: &mut Issues) -> Vec<Option<SourceNode>> {
        self.config
            .sources
            .iter()
            .map(|s| {
                let kind = issues.parse::<SourceKind>(&s.id, "source kind", &s.kind);
                if !(s.flux > 0.) {
                    issues.invalid(&s.id, format!("flux must be positive, found {}", s.flux));
                }
                let altitude = s.altitude.unwrap_or(match kind {
                    Some(SourceKind::Lgs) => LGS_ALTITUDE,
                    _ => f64::INFINITY,
                });
                if !(altitude > 0.) {
                    issues.invalid(&s.id, format!("altitude must be positive, found {altitude}"));
                }
                kind.map(|kind| SourceNode {
                    id: s.id.clone(),
                    kind,
                    direction: (s.field.0.from_arcsec(), s.field.1.from_arcsec()),
                    altitude,
                    flux: s.flux,
                })
            })
            .collect()
    }
    fn disturbances(&self, issues: &mut Issues) -> Vec<Option<DisturbanceNode>> {
        let n_mode = self.config.basis.n_mode;
        self.config
            .disturbances
            .iter()
            .map(|d| {
                let path = issues.parse::<PathTag>(&d.id, "optical path", &d.path);
                let layer = self.layer(&d.id, d.altitude, d.radius, issues);
                let modes = match &d.kind {
                    DisturbanceKind::Zernike { coefficients } => issues
                        .dimension(&d.id, "Zernike coefficients", n_mode, coefficients.len())
                        .then(|| ModalVector::from_column_slice(coefficients)),
                };
                path.zip(modes).map(|(path, modes)| DisturbanceNode {
                    id: d.id.clone(),
                    path,
                    layer,
                    modes,
                })
            })
            .collect()
    }
    fn dms(&self, issues: &mut Issues) -> Vec<Option<(DmNode, ModalVector)>> {
        let n_mode = self.config.basis.n_mode;
        self.config
            .dms
            .iter()
            .map(|d| {
                let kind = issues.parse::<DmKind>(&d.id, "DM kind", &d.kind);
                let layer = self.layer(&d.id, d.altitude, d.radius, issues);
                if !d.gain.is_finite() {
                    issues.invalid(&d.id, "gain must be finite");
                }
                let command = match &d.command {
                    Some(c) => issues
                        .dimension(&d.id, "command", n_mode, c.len())
                        .then(|| ModalVector::from_column_slice(c)),
                    None => Some(ModalVector::zeros(n_mode)),
                };
                kind.zip(command).map(|(kind, command)| {
                    (
                        DmNode {
                            id: d.id.clone(),
                            kind,
                            layer,
                            gain: d.gain,
                        },
                        command,
                    )
                })
            })
            .collect()
    }
    fn sensors(&mut self, issues: &mut Issues) -> Result<Vec<Option<SensorModel>>> {
        let mut sensors = vec![];
        for s in &self.config.sensors {
            match SensorModel::build(s, &self.config.basis, issues) {
                Ok(sensor) => sensors.push(sensor),
                Err(Error::UnsupportedFeature(feature)) => {
                    self.unsupported.push(feature);
                    sensors.push(None)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sensors)
    }
    fn propagation(&mut self, issues: &mut Issues) {
        match self.config.propagation.as_str() {
            "geometric" => (),
            "fresnel" => self
                .unsupported
                .push("Fresnel propagation is not implemented".into()),
            other => issues.push(ValidationIssue::UnknownVariant {
                owner: "config".into(),
                field: "propagation model",
                value: other.into(),
            }),
        }
    }
    /// Checks that `layer` lies below the `listed` sources and that their
    /// footprints stay inside its metapupil
    fn footprints(
        &self,
        owner: &str,
        layer: &Layer,
        listed: &HashSet<usize>,
        sources: &[Option<SourceNode>],
        issues: &mut Issues,
    ) {
        if !(layer.radius > 0.) {
            return;
        }
        let mut listed: Vec<usize> = listed.iter().copied().collect();
        listed.sort_unstable();
        for source in listed.into_iter().filter_map(|s| sources[s].as_ref()) {
            if layer.altitude >= source.altitude {
                issues.invalid(
                    owner,
                    format!(
                        "conjugated at {}m, not below source `{}` at {}m",
                        layer.altitude, source.id, source.altitude
                    ),
                );
                continue;
            }
            let ((x, y), scale) =
                propagation::footprint(layer, source, self.config.basis.pupil_radius);
            let extent = x.hypot(y) + scale;
            if extent > 1. + METAPUPIL_TOLERANCE {
                issues.invalid(
                    owner,
                    format!(
                        "footprint of source `{}` reaches {:.2}m, outside the {}m metapupil",
                        source.id,
                        extent * layer.radius,
                        layer.radius
                    ),
                );
            }
        }
    }
    /// Resolves the disturbance and DM ids a source or a sensor sees
    fn elements(&self, owner: &str, ids: &[String], issues: &mut Issues) -> HashSet<Element> {
        ids.iter()
            .filter_map(|id| match self.registry.get(id) {
                Some(Entity::Disturbance(i)) => Some(Element::Disturbance(i)),
                Some(Entity::Dm(i)) => Some(Element::Dm(i)),
                _ => {
                    issues.unknown_reference(owner, "disturbance or DM", id);
                    None
                }
            })
            .collect()
    }
    fn source_set(&self, owner: &str, ids: &[String], issues: &mut Issues) -> HashSet<usize> {
        ids.iter()
            .filter_map(|id| {
                let i = self.registry.source(id);
                if i.is_none() {
                    issues.unknown_reference(owner, "source", id);
                }
                i
            })
            .collect()
    }
}

impl OpticalSystem {
    /// Builds the optical system from the configuration
    ///
    /// All the configuration issues are reported at once in
    /// [Error::ConfigValidation]; unsupported features are reported once the
    /// configuration is valid.
    pub fn new(config: &Config) -> Result<Self> {
        let mut issues = Issues::default();
        let registry = Registry::new(config, &mut issues);
        let system = Self::build(config, &registry, &mut issues)?;
        issues.into_result()?;
        system.ok_or_else(|| Error::ConfigValidation(vec![]))
    }
    /// Builds the optical system, returning `None` if any issue was found
    pub(crate) fn build(
        config: &Config,
        registry: &Registry,
        issues: &mut Issues,
    ) -> Result<Option<Self>> {
        if config.basis.n_mode == 0 {
            issues.invalid("basis", "the modal basis needs at least one mode");
        }
        if !(config.basis.pupil_radius > 0.) {
            issues.invalid("basis", "the pupil radius must be positive");
        }
        let mut builder = Builder {
            config,
            registry,
            unsupported: vec![],
        };
        let sources = builder.sources(issues);
        let disturbances = builder.disturbances(issues);
        let dms = builder.dms(issues);
        let sensors = builder.sensors(issues)?;
        builder.propagation(issues);

        let source_sees: Vec<_> = config
            .sources
            .iter()
            .map(|s| builder.elements(&s.id, &s.sees, issues))
            .collect();
        let seen_by: Vec<_> = config
            .disturbances
            .iter()
            .map(|d| builder.source_set(&d.id, &d.seen_by, issues))
            .collect();
        let illuminates: Vec<_> = config
            .dms
            .iter()
            .map(|d| builder.source_set(&d.id, &d.illuminates, issues))
            .collect();
        for (d, listed) in disturbances.iter().zip(&seen_by) {
            if let Some(d) = d {
                builder.footprints(&d.id, &d.layer, listed, &sources, issues);
            }
        }
        for (dm, listed) in dms.iter().zip(&illuminates) {
            if let Some((dm, _)) = dm {
                builder.footprints(&dm.id, &dm.layer, listed, &sources, issues);
            }
        }
        let (sensor_sources, sensor_elements): (Vec<_>, Vec<_>) = config
            .sensors
            .iter()
            .map(|s| {
                let mut sources = HashSet::new();
                let mut elements = HashSet::new();
                for id in &s.sees {
                    match registry.get(id) {
                        Some(Entity::Source(i)) => {
                            sources.insert(i);
                        }
                        Some(Entity::Disturbance(i)) => {
                            elements.insert(Element::Disturbance(i));
                        }
                        Some(Entity::Dm(i)) => {
                            elements.insert(Element::Dm(i));
                        }
                        _ => issues.unknown_reference(&s.id, "source, disturbance or DM", id),
                    }
                }
                (sources, elements)
            })
            .unzip();

        if !issues.is_empty() {
            return Ok(None);
        }
        if let Some(feature) = builder.unsupported.first() {
            return Err(Error::UnsupportedFeature(feature.clone()));
        }
        let propagation = propagation::from_name(&config.propagation, &config.basis)?;

        let sources: Vec<SourceNode> = sources.into_iter().flatten().collect();
        let disturbances: Vec<DisturbanceNode> = disturbances.into_iter().flatten().collect();
        let (dms, commands): (Vec<DmNode>, Vec<ModalVector>) = dms.into_iter().flatten().unzip();
        let sensors: Vec<SensorModel> = sensors.into_iter().flatten().collect();

        let topology = Topology {
            basis: config.basis,
            propagation,
            sources,
            disturbances,
            dms,
            sensors,
            source_sees,
            seen_by,
            illuminates,
            sensor_sources,
            sensor_elements,
        };
        topology.check_symmetry();
        log::debug!("optical system built with {} propagation", topology.propagation.name());
        Ok(Some(Self {
            topology: Arc::new(topology),
            commands: Arc::new(commands),
        }))
    }

    /// Modal basis
    pub fn basis(&self) -> &config::ModalBasis {
        &self.topology.basis
    }
    /// Number of modes
    pub fn n_mode(&self) -> usize {
        self.topology.basis.n_mode
    }
    /// Propagation model
    pub fn propagation(&self) -> &dyn Propagation {
        self.topology.propagation.as_ref()
    }
    pub fn sources(&self) -> &[SourceNode] {
        &self.topology.sources
    }
    pub fn disturbances(&self) -> &[DisturbanceNode] {
        &self.topology.disturbances
    }
    pub fn dms(&self) -> &[DmNode] {
        &self.topology.dms
    }
    pub fn sensors(&self) -> &[SensorModel] {
        &self.topology.sensors
    }
    /// DM commands, in configuration order
    pub fn commands(&self) -> &[ModalVector] {
        &self.commands
    }
    /// Command of DM `dm_id`
    pub fn command(&self, dm_id: &str) -> Option<&ModalVector> {
        self.dm_index(dm_id).map(|k| &self.commands[k])
    }
    pub fn source_index(&self, id: &str) -> Option<usize> {
        self.topology.sources.iter().position(|s| s.id == id)
    }
    pub fn dm_index(&self, id: &str) -> Option<usize> {
        self.topology.dms.iter().position(|d| d.id == id)
    }
    pub fn sensor_index(&self, id: &str) -> Option<usize> {
        self.topology.sensors.iter().position(|s| s.id == id)
    }
    /// Checks if sensor `sensor` observes source `source`
    pub fn sensor_sees_source(&self, sensor: usize, source: usize) -> bool {
        self.topology.sensor_sources[sensor].contains(&source)
    }
    /// Checks if `element` contributes to the wavefront of source `source` measured by `sensor`
    pub fn is_contributor(&self, element: Element, source: usize, sensor: usize) -> bool {
        let t = &self.topology;
        t.source_sees[source].contains(&element)
            && t.sensor_elements[sensor].contains(&element)
            && match element {
                Element::Disturbance(i) => t.seen_by[i].contains(&source),
                Element::Dm(k) => t.illuminates[k].contains(&source),
            }
    }
    /// Checks if DM `dm` is illuminated by source `source`
    pub fn is_illuminated(&self, dm: usize, source: usize) -> bool {
        self.topology.illuminates[dm].contains(&source)
            && self.topology.source_sees[source].contains(&Element::Dm(dm))
    }
    /// Ordered modal contributors of the (source, sensor) pair given by indices
    ///
    /// Disturbances come first, then DMs, both in configuration order.
    pub fn contributors_at(&self, source: usize, sensor: usize) -> Vec<Contributor<'_>> {
        let t = &self.topology;
        let disturbances = t.disturbances.iter().enumerate().filter_map(|(i, d)| {
            self.is_contributor(Element::Disturbance(i), source, sensor)
                .then(|| Contributor {
                    element: Element::Disturbance(i),
                    id: d.id.as_str(),
                    scale: 1.,
                    layer: &d.layer,
                    modes: &d.modes,
                })
        });
        let dms = t
            .dms
            .iter()
            .zip(self.commands.iter())
            .enumerate()
            .filter_map(|(k, (d, c))| {
                self.is_contributor(Element::Dm(k), source, sensor)
                    .then(|| Contributor {
                        element: Element::Dm(k),
                        id: d.id.as_str(),
                        scale: -d.gain,
                        layer: &d.layer,
                        modes: c,
                    })
            });
        disturbances.chain(dms).collect()
    }
    /// Ordered modal contributors of the (source, sensor) pair
    pub fn contributors(&self, source_id: &str, sensor_id: &str) -> Result<Vec<Contributor<'_>>> {
        let (source, sensor) = self.pair(source_id, sensor_id)?;
        Ok(self.contributors_at(source, sensor))
    }
    /// Resolves a (source, sensor) pair of ids into indices
    pub fn pair(&self, source_id: &str, sensor_id: &str) -> Result<(usize, usize)> {
        let mut issues = Issues::default();
        let source = self.source_index(source_id);
        if source.is_none() {
            issues.unknown_reference("query", "source", source_id);
        }
        let sensor = self.sensor_index(sensor_id);
        if sensor.is_none() {
            issues.unknown_reference("query", "sensor", sensor_id);
        }
        issues.into_result()?;
        match (source, sensor) {
            (Some(source), Some(sensor)) => Ok((source, sensor)),
            _ => Err(Error::ConfigValidation(vec![])),
        }
    }
    /// Returns a new snapshot with the DM commands replaced by `commands`
    pub(crate) fn with_commands(&self, commands: Vec<ModalVector>) -> Self {
        Self {
            topology: self.topology.clone(),
            commands: Arc::new(commands),
        }
    }
}

impl Topology {
    /// Logs the visibility declarations that are not reciprocal
    fn check_symmetry(&self) {
        for (s, (source, sees)) in self.sources.iter().zip(&self.source_sees).enumerate() {
            for element in sees {
                let (id, reciprocal) = match *element {
                    Element::Disturbance(i) => {
                        let d = &self.disturbances[i];
                        if !d.path.carries(source.kind) {
                            log::warn!(
                                "{} disturbance `{}` is seen by {} source `{}`",
                                d.path,
                                d.id,
                                source.kind,
                                source.id
                            );
                        }
                        (&d.id, self.seen_by[i].contains(&s))
                    }
                    Element::Dm(k) => (&self.dms[k].id, self.illuminates[k].contains(&s)),
                };
                if !reciprocal {
                    log::warn!(
                        "source `{}` sees `{}` but `{}` does not list it back: no contribution",
                        source.id,
                        id,
                        id
                    );
                }
            }
        }
        let listed = self
            .seen_by
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.iter().map(move |&s| (Element::Disturbance(i), s)))
            .chain(
                self.illuminates
                    .iter()
                    .enumerate()
                    .flat_map(|(k, s)| s.iter().map(move |&s| (Element::Dm(k), s))),
            );
        for (element, s) in listed {
            if !self.source_sees[s].contains(&element) {
                let id = match element {
                    Element::Disturbance(i) => &self.disturbances[i].id,
                    Element::Dm(k) => &self.dms[k].id,
                };
                log::warn!(
                    "`{}` lists source `{}` which does not see it: no contribution",
                    id,
                    self.sources[s].id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Disturbance, Dm, ModalBasis, PhaseSampling, Sensor, Source};

    fn config() -> Config {
        Config::new(ModalBasis::new(3, 4.))
            .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa", "dmhi"]))
            .source(Source::new("sky", SourceKind::OnSky).sees(["ncpa", "dsm", "dmhi"]))
            .disturbance(Disturbance::zernike("ncpa", vec![0., 1., 0.]).seen_by(["cal", "sky"]))
            .dm(Dm::new("dsm", DmKind::Dsm).illuminates(["sky"]))
            .dm(Dm::new("dmhi", DmKind::DmHi)
                .altitude(10e3)
                .radius(5.)
                .illuminates(["cal", "sky"]))
            .sensor(
                Sensor::phase("pd", PhaseSampling::Modal)
                    .sees(["cal", "sky", "ncpa", "dsm", "dmhi"]),
            )
    }

    #[test]
    fn ground_layer_dm_is_missing_from_calibration_light() {
        let model = OpticalSystem::new(&config()).unwrap();
        let ids = |source| -> Vec<String> {
            model
                .contributors(source, "pd")
                .unwrap()
                .into_iter()
                .map(|c| c.id.to_string())
                .collect()
        };
        assert_eq!(ids("cal"), vec!["ncpa", "dmhi"]);
        assert_eq!(ids("sky"), vec!["ncpa", "dsm", "dmhi"]);
        let c = model.contributors("sky", "pd").unwrap();
        assert_eq!(c[0].scale, 1.);
        assert_eq!(c[1].scale, -1.);
    }

    #[test]
    fn absent_visibility_means_no_contribution() {
        let config = config().sensor(Sensor::phase("blind", PhaseSampling::Modal).sees(["cal"]));
        let model = OpticalSystem::new(&config).unwrap();
        assert!(model.contributors("cal", "blind").unwrap().is_empty());
    }

    #[test]
    fn validation_is_exhaustive() {
        let mut config = config()
            .source(Source::new("lgs", SourceKind::Lgs).sees(["ghost"]))
            .dm(Dm::new("vdm", DmKind::Vdm).command(vec![1.; 5]));
        config.dms[0].kind = "DMX".into();
        config.disturbances[0].seen_by.push("nobody".into());
        match OpticalSystem::new(&config) {
            Err(Error::ConfigValidation(issues)) => {
                assert_eq!(issues.len(), 4, "{issues:?}");
                assert!(issues.contains(&ValidationIssue::UnknownVariant {
                    owner: "dsm".into(),
                    field: "DM kind",
                    value: "DMX".into()
                }));
                assert!(issues.contains(&ValidationIssue::DimensionMismatch {
                    owner: "vdm".into(),
                    what: "command",
                    expected: 3,
                    found: 5
                }));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn layers_must_lie_below_their_guide_stars() {
        let config = Config::new(ModalBasis::new(3, 4.))
            .source(Source::new("lgs", SourceKind::Lgs).sees(["tip"]))
            .disturbance(
                Disturbance::zernike("tip", vec![0., 1., 0.])
                    .altitude(120e3)
                    .radius(8.)
                    .seen_by(["lgs"]),
            )
            .sensor(Sensor::phase("pd", PhaseSampling::Modal).sees(["lgs", "tip"]));
        match OpticalSystem::new(&config) {
            Err(Error::ConfigValidation(issues)) => {
                assert_eq!(issues.len(), 1, "{issues:?}");
                assert!(matches!(
                    &issues[0],
                    ValidationIssue::InvalidParameter { owner, .. } if owner == "tip"
                ));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        let below = |altitude: f64| {
            let mut config = config.clone();
            config.disturbances[0].altitude = altitude;
            OpticalSystem::new(&config)
        };
        assert!(below(90e3).is_err());
        assert!(below(30e3).is_ok());
    }

    #[test]
    fn footprints_must_fit_in_the_metapupil() {
        // 60arcsec at 15km is 4.36m off-axis
        let config = |radius: f64| {
            Config::new(ModalBasis::new(4, 4.))
                .source(Source::new("ngs", SourceKind::Ngs).field(60., 0.).sees(["focus"]))
                .disturbance(
                    Disturbance::zernike("focus", vec![0., 0., 0., 1.])
                        .altitude(15e3)
                        .radius(radius)
                        .seen_by(["ngs"]),
                )
                .sensor(Sensor::phase("pd", PhaseSampling::Modal).sees(["ngs", "focus"]))
        };
        match OpticalSystem::new(&config(4.)) {
            Err(Error::ConfigValidation(issues)) => {
                assert_eq!(issues.len(), 1, "{issues:?}");
                assert!(issues[0].to_string().contains("metapupil"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(OpticalSystem::new(&config(8.5)).is_ok());
    }

    #[test]
    fn fresnel_propagation_is_unsupported() {
        let config = config().propagation("fresnel");
        assert!(matches!(
            OpticalSystem::new(&config),
            Err(Error::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn lgs_default_altitude() {
        let config = config().source(Source::new("lgs", SourceKind::Lgs));
        let model = OpticalSystem::new(&config).unwrap();
        assert_eq!(model.sources()[2].altitude, LGS_ALTITUDE);
        assert!(model.sources()[0].altitude.is_infinite());
    }
}
