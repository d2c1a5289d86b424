//! Error types for the driver layer.

use sd_core::{CoreError, Real};
use sd_stepper::StepperError;
use thiserror::Error;

use crate::model::ModelError;

/// Errors reported to the caller of the driver.
///
/// A reached step limit is not an error; it is a resumable `StepStatus`.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Driver not initialized")]
    NotInitialized,

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("{what} may not be changed after initialization")]
    AlreadyInitialized { what: &'static str },

    #[error("Initialization failed: {what}")]
    InitializationFailed { what: String },

    #[error("Step failed at t={time}: {source}")]
    StepFailed { time: Real, source: StepperError },

    #[error("Model evaluation failed at t={time}: {source}")]
    ModelEvaluation { time: Real, source: ModelError },

    #[error("Stepper error: {0}")]
    Stepper(#[from] StepperError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type DriverResult<T> = Result<T, DriverError>;
