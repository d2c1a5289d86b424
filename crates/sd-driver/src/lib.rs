//! Time-stepping control and event-handling driver for simdrive.
//!
//! Drives an opaque stepper engine across a simulation timeline, reconciling
//! caller-requested report times, caller-scheduled event times, and
//! engine-internal stopping conditions into a single well-ordered sequence of
//! returns:
//! - `DynamicalSystem` model trait and `SimState` trajectory point
//! - Model adapter translating engine callbacks into model evaluations
//! - Interpolated-state construction between engine steps
//! - Session lifecycle (initialize / reinitialize without losing statistics)
//! - The `advance_to` step controller with overshoot backup and resumption

pub mod adapter;
pub mod controller;
pub mod error;
pub mod events;
pub mod interp;
pub mod model;
pub mod session;
pub mod state;

// Re-exports for public API
pub use adapter::ModelAdapter;
pub use controller::{Driver, StepStatus, TerminationReason};
pub use error::{DriverError, DriverResult};
pub use events::{EventRecord, EventTransition};
pub use interp::create_interpolated_state;
pub use model::{DynamicalSystem, ModelError};
pub use session::DriverConfig;
pub use state::{SimState, Stage};
