//! Interpolated-state construction between engine steps.

use sd_core::Real;
use sd_stepper::StepperEngine;

use crate::error::DriverResult;
use crate::state::{SimState, Stage};

/// Build a trajectory point at `t`, which must lie within the engine's last
/// taken step. The continuous vector comes from the engine's dense output;
/// discrete fields are copied from `advanced` untouched. Derived quantities
/// are left stale for the caller to realize as needed.
pub fn create_interpolated_state<E: StepperEngine + ?Sized>(
    engine: &E,
    advanced: &SimState,
    t: Real,
) -> DriverResult<SimState> {
    let mut interp = advanced.clone(); // pick up discrete fields
    engine.dense_output(t, 0, &mut interp.y)?;
    interp.time = t;
    interp.invalidate(Stage::Structure);
    Ok(interp)
}
