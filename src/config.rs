//! # Simulation configuration
//!
//! The configuration holds only enough parameters to uniquely define the forward
//! model; it is already parsed, whatever the file format it came from.
//! Turning a [Config] into an [OpticalSystem](crate::OpticalSystem) validates it
//! and performs all the one-off initialisation tasks (interaction matrices,
//! layer projections).
//!
//! Entity kinds (source, DM, optical path, output, propagation) are kept as plain
//! strings here and parsed when the model is built, so that an unknown kind is
//! reported together with every other configuration issue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn one() -> f64 {
    1f64
}
fn geometric() -> String {
    "geometric".into()
}
fn common() -> String {
    PathTag::Common.to_string()
}
fn rms() -> String {
    OutputKind::RmsResidual.to_string()
}
fn edge_points() -> usize {
    2
}
fn regularization() -> f64 {
    1e-6
}
fn max_condition() -> f64 {
    1e12
}

/// Truncated Zernike basis shared by every modal vector of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModalBasis {
    /// number of Zernike modes (Noll ordering, piston first)
    pub n_mode: usize,
    /// pupil radius [m]
    pub pupil_radius: f64,
}
impl Default for ModalBasis {
    fn default() -> Self {
        Self {
            n_mode: 11,
            pupil_radius: 4.,
        }
    }
}
impl ModalBasis {
    pub fn new(n_mode: usize, pupil_radius: f64) -> Self {
        Self {
            n_mode,
            pupil_radius,
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub basis: ModalBasis,
    /// light propagation model: `geometric` or `fresnel`
    #[serde(default = "geometric")]
    pub propagation: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub disturbances: Vec<Disturbance>,
    #[serde(default)]
    pub dms: Vec<Dm>,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub projection: Option<Projection>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            basis: Default::default(),
            propagation: geometric(),
            sources: vec![],
            disturbances: vec![],
            dms: vec![],
            sensors: vec![],
            outputs: vec![],
            projection: None,
        }
    }
}
impl Config {
    /// Creates an empty configuration with the given [modal basis](ModalBasis)
    pub fn new(basis: ModalBasis) -> Self {
        Self {
            basis,
            ..Default::default()
        }
    }
    /// Sets the propagation model
    pub fn propagation<S: Into<String>>(mut self, model: S) -> Self {
        self.propagation = model.into();
        self
    }
    /// Adds a [source](Source)
    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }
    /// Adds a [disturbance](Disturbance)
    pub fn disturbance(mut self, disturbance: Disturbance) -> Self {
        self.disturbances.push(disturbance);
        self
    }
    /// Adds a [deformable mirror](Dm)
    pub fn dm(mut self, dm: Dm) -> Self {
        self.dms.push(dm);
        self
    }
    /// Adds a [sensor](Sensor)
    pub fn sensor(mut self, sensor: Sensor) -> Self {
        self.sensors.push(sensor);
        self
    }
    /// Appends an [output](Output)
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }
    /// Sets the [tomographic projection](Projection)
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}

fn into_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(|id| id.into()).collect()
}

macro_rules! kind {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => write!(f, $label)),+
                }
            }
        }
        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    _ => Err(s.to_string()),
                }
            }
        }
    };
}

kind!(
    /// Light source type
    SourceKind {
        CalUnit => "CalUnit",
        Ngs => "NGS",
        Lgs => "LGS",
        OnSky => "OnSky",
        Vtb => "VTB",
    }
);
kind!(
    /// Deformable mirror type
    ///
    /// The DSM is the ground-layer mirror of the telescope, the others are
    /// the instrument auxiliary mirrors.
    DmKind {
        Dsm => "DSM",
        Vdm => "VDM",
        DmHi => "DMHI",
        DmLo => "DMLO",
    }
);
kind!(
    /// Optical path an aberration lives in
    PathTag {
        Common => "common",
        Lgs => "LGS-path",
        Ngs => "NGS-path",
        Science => "science-path",
    }
);
kind!(
    /// Output metric type
    OutputKind {
        RmsResidual => "RMSResidual",
        MeasurementVector => "MeasurementVector",
        ZernikeProjection => "ZernikeProjection",
    }
);

impl PathTag {
    /// Checks if light from a source of kind `source` travels along this path
    pub fn carries(&self, source: SourceKind) -> bool {
        match self {
            PathTag::Common => true,
            PathTag::Lgs => source == SourceKind::Lgs,
            PathTag::Ngs => source == SourceKind::Ngs,
            PathTag::Science => matches!(
                source,
                SourceKind::CalUnit | SourceKind::OnSky | SourceKind::Vtb
            ),
        }
    }
}

/// Light source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// id must be unique per config
    pub id: String,
    /// one of `CalUnit`, `NGS`, `LGS`, `OnSky`, `VTB`
    pub kind: String,
    /// field position [arcsec]
    #[serde(default)]
    pub field: (f64, f64),
    /// source altitude [m], LGS default to 90km, the others are at infinity
    #[serde(default)]
    pub altitude: Option<f64>,
    /// photon flux
    #[serde(default = "one")]
    pub flux: f64,
    /// ids of the disturbances and DMs coupled to the source
    #[serde(default)]
    pub sees: Vec<String>,
}
impl Source {
    /// Creates an on-axis source of unit flux that sees nothing
    pub fn new<S: Into<String>>(id: S, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.to_string(),
            field: (0., 0.),
            altitude: None,
            flux: 1.,
            sees: vec![],
        }
    }
    /// Sets the field position [arcsec]
    pub fn field(mut self, x: f64, y: f64) -> Self {
        self.field = (x, y);
        self
    }
    /// Sets the source altitude [m]
    pub fn altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }
    /// Sets the photon flux
    pub fn flux(mut self, flux: f64) -> Self {
        self.flux = flux;
        self
    }
    /// Sets the disturbances and DMs the source is coupled to
    pub fn sees<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sees = into_ids(ids);
        self
    }
}

/// Disturbance models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DisturbanceKind {
    Zernike {
        /// zernike coefficients
        coefficients: Vec<f64>,
    },
}

/// Wavefront disturbance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disturbance {
    /// id must be unique per config
    pub id: String,
    pub kind: DisturbanceKind,
    /// optical path tag
    #[serde(default = "common")]
    pub path: String,
    /// conjugation altitude [m]
    #[serde(default)]
    pub altitude: f64,
    /// basis radius [m], defaults to the pupil radius
    #[serde(default)]
    pub radius: Option<f64>,
    /// ids of the sources that see the disturbance
    #[serde(default)]
    pub seen_by: Vec<String>,
}
impl Disturbance {
    /// Creates a ground-conjugated, common-path Zernike disturbance
    pub fn zernike<S: Into<String>>(id: S, coefficients: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            kind: DisturbanceKind::Zernike { coefficients },
            path: common(),
            altitude: 0.,
            radius: None,
            seen_by: vec![],
        }
    }
    /// Sets the optical path tag
    pub fn path(mut self, path: PathTag) -> Self {
        self.path = path.to_string();
        self
    }
    /// Sets the conjugation altitude [m]
    pub fn altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }
    /// Sets the basis radius [m]
    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }
    /// Sets the sources that see the disturbance
    pub fn seen_by<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seen_by = into_ids(ids);
        self
    }
}

/// Deformable mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dm {
    /// id must be unique per config
    pub id: String,
    /// one of `DSM`, `VDM`, `DMHI`, `DMLO`
    pub kind: String,
    /// modal command, defaults to zeros
    #[serde(default)]
    pub command: Option<Vec<f64>>,
    /// conjugation altitude [m]
    #[serde(default)]
    pub altitude: f64,
    /// metapupil radius [m], defaults to the pupil radius
    #[serde(default)]
    pub radius: Option<f64>,
    /// command to wavefront gain
    #[serde(default = "one")]
    pub gain: f64,
    /// ids of the sources whose light reflects off the mirror
    #[serde(default)]
    pub illuminates: Vec<String>,
}
impl Dm {
    /// Creates a ground-conjugated DM with a null command
    pub fn new<S: Into<String>>(id: S, kind: DmKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.to_string(),
            command: None,
            altitude: 0.,
            radius: None,
            gain: 1.,
            illuminates: vec![],
        }
    }
    /// Sets the modal command
    pub fn command(mut self, command: Vec<f64>) -> Self {
        self.command = Some(command);
        self
    }
    /// Sets the conjugation altitude [m]
    pub fn altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }
    /// Sets the metapupil radius [m]
    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }
    /// Sets the command to wavefront gain
    pub fn gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }
    /// Sets the sources illuminating the mirror
    pub fn illuminates<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.illuminates = into_ids(ids);
        self
    }
}

/// Shack-Hartmann lenslet array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Lenslets {
    /// Interaction matrix given row-wise: `2 x n_subaperture` rows (x slopes first)
    /// by `n_mode` columns
    Explicit {
        n_subaperture: usize,
        interaction: Vec<f64>,
    },
    /// Square lenslet array across the pupil, subapertures centred inside the pupil are kept
    Geometric {
        /// nsubs across aperture
        nsubx: usize,
        /// number of samples along each subaperture edge
        #[serde(default = "edge_points")]
        npoints: usize,
    },
}

/// Phase sensor output sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhaseSampling {
    /// modal coefficients
    Modal,
    /// phase map on a `nsample x nsample` grid restricted to the pupil
    Map { nsample: usize },
}

/// Sensor types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SensorKind {
    SHWFS { lenslets: Lenslets },
    Phase { sampling: PhaseSampling },
    ZernikeProjection,
}

/// Measurement noise
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NoiseModel {
    None,
    /// white Gaussian noise of standard deviation `sigma`
    Gaussian { sigma: f64 },
    /// Gaussian noise of standard deviation `sigma` for a source of flux `reference_flux`,
    /// scaled by the square root of the flux ratio for other sources
    Photon { sigma: f64, reference_flux: f64 },
}
impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel::None
    }
}

/// Wavefront sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    /// id must be unique per config
    pub id: String,
    pub kind: SensorKind,
    #[serde(default)]
    pub noise: NoiseModel,
    /// ids of the sources, disturbances and DMs the sensor measures
    #[serde(default)]
    pub sees: Vec<String>,
    /// measurement unit conversion factor
    #[serde(default = "one")]
    pub unit: f64,
}
impl Sensor {
    /// Creates a noiseless Shack-Hartmann WFS
    pub fn shwfs<S: Into<String>>(id: S, lenslets: Lenslets) -> Self {
        Self {
            id: id.into(),
            kind: SensorKind::SHWFS { lenslets },
            noise: NoiseModel::None,
            sees: vec![],
            unit: 1.,
        }
    }
    /// Creates a noiseless phase sensor
    pub fn phase<S: Into<String>>(id: S, sampling: PhaseSampling) -> Self {
        Self {
            id: id.into(),
            kind: SensorKind::Phase { sampling },
            noise: NoiseModel::None,
            sees: vec![],
            unit: 1.,
        }
    }
    /// Sets the [noise model](NoiseModel)
    pub fn noise(mut self, noise: NoiseModel) -> Self {
        self.noise = noise;
        self
    }
    /// Sets the unit conversion factor
    pub fn unit(mut self, unit: f64) -> Self {
        self.unit = unit;
        self
    }
    /// Sets the sources, disturbances and DMs the sensor measures
    pub fn sees<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sees = into_ids(ids);
        self
    }
}

/// Output metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// output name, defaults to `<sensor>@<source>`
    #[serde(default)]
    pub name: Option<String>,
    /// one of `RMSResidual`, `MeasurementVector`
    #[serde(default = "rms")]
    pub kind: String,
    /// sensor id
    pub sensor: String,
    /// source id giving the direction
    pub source: String,
    /// unit conversion factor
    #[serde(default = "one")]
    pub unit: f64,
    /// evaluates the noisy measurement if true
    #[serde(default)]
    pub noisy: bool,
}
impl Output {
    /// Creates a noiseless output of kind `kind` for `sensor` in the direction of `source`
    pub fn new<S: Into<String>, D: Into<String>>(kind: OutputKind, sensor: S, source: D) -> Self {
        Self {
            name: None,
            kind: kind.to_string(),
            sensor: sensor.into(),
            source: source.into(),
            unit: 1.,
            noisy: false,
        }
    }
    /// Noiseless RMS residual of `sensor` in the direction of `source`
    pub fn rms<S: Into<String>, D: Into<String>>(sensor: S, source: D) -> Self {
        Self::new(OutputKind::RmsResidual, sensor, source)
    }
    /// Sets the output name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }
    /// Sets the unit conversion factor
    pub fn unit(mut self, unit: f64) -> Self {
        self.unit = unit;
        self
    }
    /// Evaluates the noisy measurement
    pub fn noisy(mut self) -> Self {
        self.noisy = true;
        self
    }
    /// Returns the output name
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}@{}", self.sensor, self.source))
    }
}

/// Calibration direction of the tomographic projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Direction {
    /// source id
    pub source: String,
    /// field weight
    #[serde(default = "one")]
    pub weight: f64,
}
impl Direction {
    /// Creates a direction toward `source` with field weight `weight`
    pub fn new<S: Into<String>>(source: S, weight: f64) -> Self {
        Self {
            source: source.into(),
            weight,
        }
    }
}
impl From<&str> for Direction {
    fn from(source: &str) -> Self {
        Self::new(source, 1.)
    }
}
impl From<String> for Direction {
    fn from(source: String) -> Self {
        Self::new(source, 1.)
    }
}

/// Tomographic projection of the calibration residuals onto the DMs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    /// id of the sensor reconstructing the residual modes (a modal phase sensor)
    pub sensor: String,
    /// calibration directions
    pub directions: Vec<Direction>,
    /// ids of the fitted DMs, all the DMs if empty
    #[serde(default)]
    pub dms: Vec<String>,
    /// ids of the DMs not illuminated by calibration light, which contribution is modelled
    #[serde(default)]
    pub model_based: Vec<String>,
    /// Tikhonov regularization coefficient
    #[serde(default = "regularization")]
    pub regularization: f64,
    /// largest condition number accepted for the regularized system
    #[serde(default = "max_condition")]
    pub max_condition: f64,
    /// fits the noisy reconstruction if true
    #[serde(default)]
    pub noisy: bool,
}
impl Projection {
    /// Creates a projection through `sensor` with uniformly weighted `directions`
    pub fn new<S, I, D>(sensor: S, directions: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = D>,
        D: Into<Direction>,
    {
        Self {
            sensor: sensor.into(),
            directions: directions.into_iter().map(|d| d.into()).collect(),
            dms: vec![],
            model_based: vec![],
            regularization: regularization(),
            max_condition: max_condition(),
            noisy: false,
        }
    }
    /// Sets the fitted DMs
    pub fn dms<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dms = into_ids(ids);
        self
    }
    /// Sets the DMs which contribution is derived from the optical model
    pub fn model_based<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_based = into_ids(ids);
        self
    }
    /// Sets the Tikhonov regularization coefficient
    pub fn regularization(mut self, lambda: f64) -> Self {
        self.regularization = lambda;
        self
    }
    /// Sets the largest condition number accepted
    pub fn max_condition(mut self, max_condition: f64) -> Self {
        self.max_condition = max_condition;
        self
    }
    /// Fits the noisy reconstruction
    pub fn noisy(mut self) -> Self {
        self.noisy = true;
        self
    }
}
