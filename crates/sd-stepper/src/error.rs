//! Error types for stepper engines.

use sd_core::{CoreError, Real};
use thiserror::Error;

/// Errors that abort a stepping session. Recoverable evaluation failures are
/// not represented here; they are signalled through `CallbackStatus` and
/// handled inside the engine by retrying with a smaller step.
#[derive(Error, Debug)]
pub enum StepperError {
    #[error("Stepper session not initialized")]
    NotInitialized,

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Step size underflow at t={time}: {what}")]
    StepSizeUnderflow { time: Real, what: &'static str },

    #[error("Repeated recoverable evaluation failures at t={time}")]
    RepeatedRecoverableFailure { time: Real },

    #[error("Dense output time {time} outside last step [{lo}, {hi}]")]
    DenseOutputOutOfRange { time: Real, lo: Real, hi: Real },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type StepperResult<T> = Result<T, StepperError>;
