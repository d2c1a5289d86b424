//! Session lifecycle: configuration, initialization, and reinitialization.
//!
//! A driver session is established once with `initialize` and may be
//! re-established in place with `reinitialize` after an event handler edits
//! the state. Reinitialization keeps the engine's accumulated statistics;
//! only a full `initialize` starts them over.

use sd_core::{Real, Tolerances};
use sd_stepper::StepperEngine;
use tracing::info;

use crate::controller::{Driver, TerminationReason};
use crate::error::{DriverError, DriverResult};
use crate::model::DynamicalSystem;
use crate::state::{SimState, Stage};

/// Caller-visible integration settings, applied to the engine at
/// initialization time. `None` leaves the engine's own default in place.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Local error tolerances for the engine's accuracy control.
    pub tolerances: Tolerances,
    /// Tolerance for constraint-manifold projection.
    pub constraint_tolerance: Real,
    pub initial_step: Option<Real>,
    pub min_step: Option<Real>,
    pub max_step: Option<Real>,
    /// Hard final time; when set, stepping never goes past it and reaching
    /// it ends the simulation.
    pub final_time: Option<Real>,
    /// Internal steps allowed per `advance_to` call before a resumable
    /// `ReachedStepLimit` return.
    pub internal_step_limit: Option<usize>,
    /// Return `TimeHasAdvanced` after every internal step.
    pub return_every_internal_step: bool,
    /// Project onto the constraint manifold after every accepted step
    /// rather than at the engine's discretion.
    pub project_every_step: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            constraint_tolerance: 1e-6,
            initial_step: None,
            min_step: None,
            max_step: None,
            final_time: None,
            internal_step_limit: None,
            return_every_internal_step: false,
            project_every_step: false,
        }
    }
}

impl<S: DynamicalSystem, E: StepperEngine> Driver<S, E> {
    /// Create an unstarted driver. Call `initialize` before `advance_to`.
    pub fn new(system: S, engine: E, config: DriverConfig) -> Self {
        let dim = system.dim();
        let n_constraints = system.n_constraints();
        let n_events = system.n_events();
        Self {
            system,
            engine,
            config,
            advanced: SimState::new(
                0.0,
                nalgebra::DVector::zeros(dim),
                n_constraints,
                n_events,
            ),
            interpolated: None,
            use_interpolated: false,
            initialized: false,
            projection_chosen: false,
            start_of_continuous_interval: false,
            pending: None,
            previous_start_time: 0.0,
            triggered: Vec::new(),
            event_window: None,
            termination_reason: None,
        }
    }

    /// Establish the session at `state`. Resets engine statistics and any
    /// prior session.
    pub fn initialize(&mut self, state: SimState) -> DriverResult<()> {
        if state.dim() != self.system.dim() {
            return Err(DriverError::InvalidArg {
                what: "state dimension does not match the model",
            });
        }
        self.advanced = state;
        self.interpolated = None;
        self.use_interpolated = false;
        self.pending = None;
        self.triggered.clear();
        self.event_window = None;
        self.termination_reason = None;
        self.previous_start_time = self.advanced.time;

        self.apply_engine_settings();

        self.system
            .realize(&mut self.advanced, Stage::Acceleration)
            .map_err(|e| DriverError::InitializationFailed {
                what: format!("failed to evaluate initial derivatives: {e}"),
            })?;
        self.engine
            .init(
                self.advanced.time,
                &self.advanced.y,
                &self.advanced.ydot,
                self.config.tolerances,
            )
            .map_err(|e| DriverError::InitializationFailed {
                what: format!("engine rejected the initial state: {e}"),
            })?;
        self.engine.reset_stats();
        if !self.projection_chosen && self.system.n_constraints() > 0 {
            // constrained models get model-paced projection unless the
            // caller asked for engine-managed projection
            self.engine.proj_define();
        }
        self.engine.root_init(self.system.n_events());

        self.initialized = true;
        self.start_of_continuous_interval = true;
        info!(
            t0 = self.advanced.time,
            dim = self.advanced.dim(),
            n_events = self.system.n_events(),
            "driver session initialized"
        );
        Ok(())
    }

    /// Re-establish the session from the advanced state after an event
    /// handler modified it at `lowest_modified` or above. Engine statistics
    /// and configuration are preserved. A change at `Stage::Report` or above
    /// touched nothing the engine depends on, so the session continues.
    pub fn reinitialize(
        &mut self,
        lowest_modified: Stage,
        should_terminate: bool,
    ) -> DriverResult<()> {
        if !self.initialized {
            return Err(DriverError::NotInitialized);
        }
        if lowest_modified < Stage::Report {
            self.pending = None;
            self.interpolated = None;
            self.use_interpolated = false;
            self.realize_advanced()?;
            self.engine.reinit(
                self.advanced.time,
                &self.advanced.y,
                &self.advanced.ydot,
                self.config.tolerances,
            )?;
            self.start_of_continuous_interval = true;
        }
        if should_terminate {
            self.termination_reason =
                Some(TerminationReason::EventHandlerRequestedTermination);
        }
        Ok(())
    }

    /// Choose engine-managed projection (`true`, the engine also projects
    /// its error estimate) or model-paced projection (`false`). Fixed once
    /// the session is established.
    pub fn set_use_engine_projection(&mut self, use_engine: bool) -> DriverResult<()> {
        if self.initialized {
            return Err(DriverError::AlreadyInitialized {
                what: "projection mode",
            });
        }
        if use_engine {
            self.engine.proj_init(self.config.constraint_tolerance);
        } else {
            self.engine.proj_define();
        }
        self.projection_chosen = true;
        Ok(())
    }

    fn apply_engine_settings(&mut self) {
        if let Some(h) = self.config.initial_step {
            self.engine.set_initial_step(h);
        }
        if let Some(h) = self.config.min_step {
            self.engine.set_min_step(h);
        }
        if let Some(h) = self.config.max_step {
            self.engine.set_max_step(h);
        }
        if let Some(t) = self.config.final_time {
            self.engine.set_stop_time(t);
        }
        if let Some(n) = self.config.internal_step_limit {
            self.engine.set_max_steps(n);
        }
        if self.config.project_every_step {
            self.engine.set_proj_frequency(1);
        }
    }
}
