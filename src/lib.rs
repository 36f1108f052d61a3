//! # NCPA calibration
//!
//! Forward optical model and tomographic DM command solver for the calibration of
//! non-common-path aberrations of an adaptive optics instrument.
//!
//! A [Config] is turned into an immutable [OpticalSystem] snapshot, the
//! [aggregator] sums the modal contributions of disturbances and DMs seen by each
//! (direction, sensor) pair, the [projector] fits DM commands to the calibration
//! residuals, the [applier] installs them in a new snapshot and the [sensor]
//! models and [metric]s predict what the corrected instrument would measure.

pub mod aggregator;
pub mod applier;
pub mod batch;
pub mod config;
pub mod metric;
pub mod model;
pub mod modes;
pub mod projector;
pub mod propagation;
pub mod sensor;
pub mod simulation;
mod validation;

pub use config::Config;
#[doc(no_inline)]
pub use model::{ModalVector, OpticalSystem};
#[doc(no_inline)]
pub use simulation::{run_simulation, Simulation, SimulationResult};
pub use validation::ValidationIssue;

/// Numerical failures of the solvers
#[derive(Debug, thiserror::Error)]
pub enum NumericError {
    #[error("regularized system condition number {condition_number:e} exceeds {max_condition:e}")]
    IllConditioned {
        condition_number: f64,
        max_condition: f64,
    },
    #[error("linear solver failed: {0}")]
    Solver(String),
    #[error("invalid noise distribution: {0}")]
    Noise(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration ({} issues): {}", .0.len(), validation::summary(.0))]
    ConfigValidation(Vec<ValidationIssue>),
    #[error("numerical failure: {0}")]
    Numeric(#[from] NumericError),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("worker task failed: {0}")]
    Worker(String),
}
pub type Result<T> = std::result::Result<T, Error>;
