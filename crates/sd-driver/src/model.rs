//! DynamicalSystem trait for pluggable physical models.

use nalgebra::DVector;
use sd_core::{EventId, Real};
use thiserror::Error;

use crate::state::{SimState, Stage};

/// Failure raised while evaluating the model.
///
/// The driver's adapter converts these into recoverable signals at the
/// engine boundary; it never decides itself whether the failure is truly
/// recoverable.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model evaluation failed: {what}")]
    Evaluation { what: String },

    #[error("Projection failed: {what}")]
    Projection { what: String },
}

/// Trait for the physical dynamical system driven by the integration core.
///
/// A model must be able to:
/// - realize derived quantities (ydot, yerr, triggers) up to a stage
/// - project a state onto its constraint manifold
/// - supply unit weights and tolerances for weighted projection
pub trait DynamicalSystem {
    /// Dimension of the continuous state vector.
    fn dim(&self) -> usize;

    /// Number of velocity-level constraint residuals.
    fn n_constraints(&self) -> usize {
        0
    }

    /// Number of event trigger functions.
    fn n_events(&self) -> usize {
        0
    }

    /// Bring `state`'s derived quantities up to `stage`:
    /// - `Velocity` fills `yerr`
    /// - `Acceleration` fills `ydot` and `triggers`
    fn realize(&self, state: &mut SimState, stage: Stage) -> Result<(), ModelError>;

    /// Project `state` onto the constraint manifold within `tol`, using the
    /// supplied weighting vectors. When `err` is given, the component normal
    /// to the manifold may be removed from it in place.
    ///
    /// Default: unconstrained model, nothing to do.
    fn project(
        &self,
        state: &mut SimState,
        tol: Real,
        weights: &DVector<f64>,
        unit_tolerances: &DVector<f64>,
        err: Option<&mut DVector<f64>>,
    ) -> Result<(), ModelError> {
        let _ = (state, tol, weights, unit_tolerances, err);
        Ok(())
    }

    /// Per-component scaling putting y into unit weights.
    fn calc_y_unit_weights(&self, state: &SimState) -> DVector<f64> {
        let _ = state;
        DVector::from_element(self.dim(), 1.0)
    }

    /// Per-residual unit error tolerances.
    fn calc_yerr_unit_tolerances(&self, state: &SimState) -> DVector<f64> {
        let _ = state;
        DVector::from_element(self.n_constraints(), 1.0)
    }

    /// Map a trigger index to the model's global event identifier.
    fn event_id(&self, index: usize) -> EventId {
        EventId::from_index(index as u32)
    }
}
