//! OdeProblem trait: the callback shape a stepper engine drives.
//!
//! The problem is passed explicitly into every engine call rather than being
//! registered at session creation, so the evaluation context never hides
//! behind a stored back-reference.

use nalgebra::DVector;
use sd_core::Real;

/// Outcome of a single problem evaluation.
///
/// `Recoverable` tells the engine the evaluation failed in a way that may
/// succeed again with a smaller step; the engine decides whether to retry.
/// The problem never judges recoverability itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackStatus {
    Ok,
    Recoverable,
}

impl CallbackStatus {
    pub fn is_ok(self) -> bool {
        self == CallbackStatus::Ok
    }
}

/// Evaluation entry points for a continuous-time problem.
///
/// All vectors are sized by the caller; implementations write results in
/// place. `y` is the continuous state, `ydot` its time derivative.
pub trait OdeProblem {
    /// Evaluate ydot = f(t, y).
    fn derivative(&mut self, t: Real, y: &DVector<f64>, ydot: &mut DVector<f64>) -> CallbackStatus;

    /// Evaluate the velocity-level constraint residuals yerr = c(t, y).
    ///
    /// Default: no constraints, residual vector left untouched.
    fn constraint(
        &mut self,
        _t: Real,
        _y: &DVector<f64>,
        _yerr: &mut DVector<f64>,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }

    /// Project (t, y) onto the constraint manifold.
    ///
    /// Writes the applied correction into `ycorr` (projected y minus input
    /// y). `eps_proj` is the projection tolerance. When `err` is supplied it
    /// is the engine's current error estimate and may be projected in place
    /// to remove the component normal to the manifold.
    ///
    /// Default: unconstrained, zero correction.
    fn project(
        &mut self,
        _t: Real,
        _y: &DVector<f64>,
        ycorr: &mut DVector<f64>,
        _eps_proj: Real,
        _err: Option<&mut DVector<f64>>,
    ) -> CallbackStatus {
        ycorr.fill(0.0);
        CallbackStatus::Ok
    }

    /// Evaluate the event trigger functions gout = g(t, y).
    ///
    /// Default: no triggers.
    fn root(
        &mut self,
        _t: Real,
        _y: &DVector<f64>,
        _yp: &DVector<f64>,
        _gout: &mut DVector<f64>,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
}
