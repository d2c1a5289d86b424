//! Model adapter: translates engine callbacks into model evaluations.
//!
//! The adapter borrows the evaluation context explicitly for the duration of
//! one engine call, so the model's scratch state is never reached through a
//! hidden back-reference. Every entry point writes the trial (t, y) into the
//! scratch state, realizes to the stage that produces the requested derived
//! quantity, and converts any model failure into a recoverable signal; the
//! engine decides whether to retry with a smaller step.

use nalgebra::DVector;
use sd_core::Real;
use sd_stepper::{CallbackStatus, OdeProblem};

use crate::model::DynamicalSystem;
use crate::state::{SimState, Stage};

/// Adapter implementing the engine's callback shape over a dynamical system
/// and a mutable scratch state.
pub struct ModelAdapter<'a, S: DynamicalSystem> {
    pub(crate) system: &'a S,
    pub(crate) state: &'a mut SimState,
    pub(crate) constraint_tolerance: Real,
}

impl<'a, S: DynamicalSystem> ModelAdapter<'a, S> {
    pub fn new(system: &'a S, state: &'a mut SimState, constraint_tolerance: Real) -> Self {
        Self {
            system,
            state,
            constraint_tolerance,
        }
    }

    fn load_trial(&mut self, t: Real, y: &DVector<f64>) {
        self.state.time = t;
        self.state.y.copy_from(y);
        self.state.invalidate(Stage::Structure);
    }
}

impl<S: DynamicalSystem> OdeProblem for ModelAdapter<'_, S> {
    /// ydot = f(t, y).
    fn derivative(&mut self, t: Real, y: &DVector<f64>, ydot: &mut DVector<f64>) -> CallbackStatus {
        self.load_trial(t, y);
        match self.system.realize(self.state, Stage::Acceleration) {
            Ok(()) => {
                ydot.copy_from(&self.state.ydot);
                CallbackStatus::Ok
            }
            Err(_) => CallbackStatus::Recoverable,
        }
    }

    /// yerr = c(t, y).
    fn constraint(&mut self, t: Real, y: &DVector<f64>, yerr: &mut DVector<f64>) -> CallbackStatus {
        self.load_trial(t, y);
        match self.system.realize(self.state, Stage::Velocity) {
            Ok(()) => {
                yerr.copy_from(&self.state.yerr);
                CallbackStatus::Ok
            }
            Err(_) => CallbackStatus::Recoverable,
        }
    }

    /// Given (t, y) off the constraint manifold, return the correction
    /// `ycorr` such that y + ycorr lies on it within the configured
    /// tolerance. The engine's error estimate, when supplied, is projected
    /// in place by the model.
    fn project(
        &mut self,
        t: Real,
        y: &DVector<f64>,
        ycorr: &mut DVector<f64>,
        _eps_proj: Real,
        err: Option<&mut DVector<f64>>,
    ) -> CallbackStatus {
        self.load_trial(t, y);
        let projected = (|| {
            self.system.realize(self.state, Stage::Position)?;
            let weights = self.system.calc_y_unit_weights(self.state);
            let unit_tolerances = self.system.calc_yerr_unit_tolerances(self.state);
            self.system.project(
                self.state,
                self.constraint_tolerance,
                &weights,
                &unit_tolerances,
                err,
            )
        })();
        match projected {
            Ok(()) => {
                for i in 0..ycorr.len() {
                    ycorr[i] = self.state.y[i] - y[i];
                }
                CallbackStatus::Ok
            }
            Err(_) => CallbackStatus::Recoverable,
        }
    }

    /// gout = g(t, y): the event trigger values.
    fn root(
        &mut self,
        t: Real,
        y: &DVector<f64>,
        _yp: &DVector<f64>,
        gout: &mut DVector<f64>,
    ) -> CallbackStatus {
        self.load_trial(t, y);
        match self.system.realize(self.state, Stage::Acceleration) {
            Ok(()) => {
                gout.copy_from(&self.state.triggers);
                CallbackStatus::Ok
            }
            Err(_) => CallbackStatus::Recoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;

    /// y' = -y with one trigger g = t - 1 and a failure switch.
    struct DecaySystem {
        fail: bool,
    }

    impl DynamicalSystem for DecaySystem {
        fn dim(&self) -> usize {
            1
        }
        fn n_events(&self) -> usize {
            1
        }
        fn realize(&self, state: &mut SimState, stage: Stage) -> Result<(), ModelError> {
            if self.fail {
                return Err(ModelError::Evaluation {
                    what: "forced failure".into(),
                });
            }
            if stage >= Stage::Acceleration {
                state.ydot[0] = -state.y[0];
                state.triggers[0] = state.time - 1.0;
            }
            state.stage = stage;
            Ok(())
        }
    }

    #[test]
    fn derivative_realizes_and_copies() {
        let system = DecaySystem { fail: false };
        let mut state = SimState::new(0.0, DVector::from_vec(vec![2.0]), 0, 1);
        let mut adapter = ModelAdapter::new(&system, &mut state, 1e-6);

        let y = DVector::from_vec(vec![3.0]);
        let mut ydot = DVector::zeros(1);
        assert!(adapter.derivative(0.5, &y, &mut ydot).is_ok());
        assert_eq!(ydot[0], -3.0);
        assert_eq!(state.time, 0.5);
        assert_eq!(state.y[0], 3.0);
    }

    #[test]
    fn failures_surface_as_recoverable() {
        let system = DecaySystem { fail: true };
        let mut state = SimState::new(0.0, DVector::zeros(1), 0, 1);
        let mut adapter = ModelAdapter::new(&system, &mut state, 1e-6);

        let y = DVector::zeros(1);
        let yp = DVector::zeros(1);
        let mut out = DVector::zeros(1);
        assert_eq!(
            adapter.derivative(0.0, &y, &mut out),
            CallbackStatus::Recoverable
        );
        assert_eq!(adapter.root(0.0, &y, &yp, &mut out), CallbackStatus::Recoverable);
    }

    #[test]
    fn root_reports_trigger_values() {
        let system = DecaySystem { fail: false };
        let mut state = SimState::new(0.0, DVector::zeros(1), 0, 1);
        let mut adapter = ModelAdapter::new(&system, &mut state, 1e-6);

        let y = DVector::zeros(1);
        let yp = DVector::zeros(1);
        let mut gout = DVector::zeros(1);
        assert!(adapter.root(0.25, &y, &yp, &mut gout).is_ok());
        assert!((gout[0] - (0.25 - 1.0)).abs() < 1e-15);
    }
}
