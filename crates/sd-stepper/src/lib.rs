//! Continuous-time stepping engines for simdrive.
//!
//! This crate defines the opaque stepper contract consumed by the driver
//! layer, plus a built-in adaptive Runge-Kutta engine:
//! - `OdeProblem`: the callback shape an engine drives (derivative,
//!   constraint residual, manifold projection, event triggers)
//! - `StepperEngine`: session lifecycle, stepping, dense output, root
//!   detection, projection setup, step-size configuration, statistics
//! - `RkStepper`: Dormand-Prince 5(4) with PI step control, cubic-Hermite
//!   dense output, and bisection root localization

pub mod engine;
pub mod error;
pub mod problem;
pub mod rk;

pub use engine::{StepMode, StepOutcome, StepStats, StepperEngine};
pub use error::{StepperError, StepperResult};
pub use problem::{CallbackStatus, OdeProblem};
pub use rk::RkStepper;
