//! Simulation state shared between the model and the driver.

use nalgebra::DVector;
use sd_core::Real;

/// Computational stage a state's derived quantities have been realized to.
///
/// The ordering matters: a state realized to `Acceleration` is also valid at
/// `Velocity` and below. `Structure` marks a consistent (t, y) with no
/// derived quantities yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Empty,
    Structure,
    Position,
    Velocity,
    Acceleration,
    Report,
}

/// One point on a simulation trajectory.
///
/// `y` is the continuous position/velocity vector advanced by the engine;
/// `discrete` holds non-continuous fields that stepping and interpolation
/// never touch. The derived vectors are valid only up to `stage`.
#[derive(Clone, Debug)]
pub struct SimState {
    pub time: Real,
    pub y: DVector<f64>,
    /// Discrete (non-continuous) fields, untouched by the engine.
    pub discrete: Vec<Real>,
    /// Derivative of y; valid once realized to `Acceleration`.
    pub ydot: DVector<f64>,
    /// Velocity-level constraint residuals; valid once realized to `Velocity`.
    pub yerr: DVector<f64>,
    /// Event trigger values; valid once realized to `Acceleration`.
    pub triggers: DVector<f64>,
    /// Highest stage the derived quantities are valid for.
    pub stage: Stage,
}

impl SimState {
    /// Create a state at `time` with continuous vector `y` and zeroed
    /// derived quantities sized for the model.
    pub fn new(time: Real, y: DVector<f64>, n_constraints: usize, n_events: usize) -> Self {
        let n = y.len();
        Self {
            time,
            y,
            discrete: Vec::new(),
            ydot: DVector::zeros(n),
            yerr: DVector::zeros(n_constraints),
            triggers: DVector::zeros(n_events),
            stage: Stage::Structure,
        }
    }

    /// Attach discrete fields.
    pub fn with_discrete(mut self, discrete: Vec<Real>) -> Self {
        self.discrete = discrete;
        self
    }

    /// Dimension of the continuous vector.
    pub fn dim(&self) -> usize {
        self.y.len()
    }

    /// Mark derived quantities above `stage` as stale.
    pub fn invalidate(&mut self, stage: Stage) {
        if self.stage > stage {
            self.stage = stage;
        }
    }
}
