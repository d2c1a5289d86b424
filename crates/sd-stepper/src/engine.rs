//! StepperEngine trait: the opaque solver contract consumed by the driver.

use nalgebra::DVector;
use sd_core::{Real, Tolerances};

use crate::error::StepperResult;
use crate::problem::OdeProblem;

/// How a single `step` call is bounded.
///
/// The two independent choices are whether a hard stop time is honored and
/// whether the engine returns after every internal step or only once the
/// target time is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode {
    /// Advance until the target time is reached (the final internal step may
    /// overshoot it).
    Normal,
    /// Take a single internal step and return.
    OneStep,
    /// Like `Normal`, but never step past the configured stop time.
    NormalTstop,
    /// Like `OneStep`, but never step past the configured stop time.
    OneStepTstop,
}

impl StepMode {
    pub fn one_step(self) -> bool {
        matches!(self, StepMode::OneStep | StepMode::OneStepTstop)
    }

    pub fn honors_stop_time(self) -> bool {
        matches!(self, StepMode::NormalTstop | StepMode::OneStepTstop)
    }
}

/// Non-fatal outcome of a `step` call. Fatal outcomes are `Err` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Advanced normally; in `Normal*` modes the returned time is at or past
    /// the target time.
    Success,
    /// The configured stop time was reached exactly.
    TstopReturn,
    /// One or more event triggers changed sign; the returned time is the
    /// localized root time and `root_info` identifies the triggers.
    RootReturn,
    /// The step-count limit was exhausted before the target time. The
    /// session remains valid and a later call resumes where this left off.
    TooMuchWork,
}

/// Running step statistics, accumulated across `step` calls and reset only
/// by `reset_stats` (or by recreating the engine).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepStats {
    pub steps_attempted: u64,
    pub steps_taken: u64,
    pub error_test_failures: u64,
}

/// Contract for an opaque continuous-time stepping engine.
///
/// A session is established with `init`, advanced with `step`, and may be
/// re-established in place with `reinit` (preserving statistics and
/// configuration). Dense output is valid only within the last taken step.
pub trait StepperEngine {
    /// Establish a session at (t0, y0) with derivative ydot0.
    fn init(
        &mut self,
        t0: Real,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
        tol: Tolerances,
    ) -> StepperResult<()>;

    /// Re-establish the session from a new point without discarding
    /// accumulated statistics or configuration.
    fn reinit(
        &mut self,
        t0: Real,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
        tol: Tolerances,
    ) -> StepperResult<()>;

    /// Advance toward `t_max` under `mode`, driving `problem` for all
    /// evaluations. On return, `yout`/`ypout` hold the state and derivative
    /// at the returned time.
    fn step(
        &mut self,
        problem: &mut dyn OdeProblem,
        t_max: Real,
        mode: StepMode,
        yout: &mut DVector<f64>,
        ypout: &mut DVector<f64>,
    ) -> StepperResult<(StepOutcome, Real)>;

    /// Evaluate the dense-output interpolant (order 0) or its derivative
    /// (order 1) at a time inside the last taken step.
    fn dense_output(&self, t: Real, order: u8, out: &mut DVector<f64>) -> StepperResult<()>;

    /// Configure event-trigger detection for `count` trigger functions.
    fn root_init(&mut self, count: usize);

    /// Per-trigger flags identifying which triggers fired on the most recent
    /// `RootReturn`.
    fn root_info(&self) -> &[bool];

    /// Use engine-managed projection with the given tolerance; the engine
    /// also projects its error estimate through the problem's projection.
    fn proj_init(&mut self, tolerance: Real);

    /// Use problem-defined projection: the problem's `project` is invoked as
    /// configured but the error estimate is left alone.
    fn proj_define(&mut self);

    // Step-size and limit configuration.
    fn set_initial_step(&mut self, h: Real);
    fn set_min_step(&mut self, h: Real);
    fn set_max_step(&mut self, h: Real);
    fn set_stop_time(&mut self, t: Real);
    fn set_max_steps(&mut self, n: usize);
    fn set_proj_frequency(&mut self, every_n_steps: usize);

    /// Size of the first step actually taken, once one has been taken.
    fn actual_initial_step(&self) -> Option<Real>;
    /// Size of the most recently taken step.
    fn last_step_size(&self) -> Option<Real>;
    /// Step size the engine would attempt next.
    fn predicted_next_step_size(&self) -> Option<Real>;

    fn stats(&self) -> StepStats;
    fn reset_stats(&mut self);
}
