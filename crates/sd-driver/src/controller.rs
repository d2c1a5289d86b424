//! The step controller: reconciles report times, scheduled event times, and
//! engine stopping conditions into a well-ordered sequence of returns.
//!
//! `advance_to` runs the engine forward and classifies what it hits. When a
//! return lands before the engine's actual internal time (a report time, or a
//! scheduled event inside an overshooting step), the controller parks the
//! engine outcome in a pending record and replays it on the next call, so the
//! engine itself is never asked to step backward.

use nalgebra::DVector;
use sd_core::{ensure_finite, Real};
use sd_stepper::{StepMode, StepOutcome, StepStats, StepperEngine};
use tracing::{debug, trace};

use crate::adapter::ModelAdapter;
use crate::error::{DriverError, DriverResult};
use crate::events::{collect_triggered, EventRecord};
use crate::interp::create_interpolated_state;
use crate::model::DynamicalSystem;
use crate::session::DriverConfig;
use crate::state::{SimState, Stage};

/// What an `advance_to` call delivered. Every variant leaves the driver in a
/// resumable condition except `EndOfSimulation`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// The reported state is at the requested report time.
    ReachedReportTime,
    /// The reported state is at the caller-scheduled event time.
    ReachedScheduledEvent,
    /// One or more trigger functions changed sign; `triggered_events`
    /// identifies them.
    ReachedEventTrigger,
    /// The internal step limit ran out before anything else happened.
    ReachedStepLimit,
    /// One internal step was taken (only in return-every-step mode).
    TimeHasAdvanced,
    /// First call of a continuous interval; the current state is reported
    /// as-is so it appears on the trajectory.
    StartOfContinuousInterval,
    /// The configured final time was reached; see `termination_reason`.
    EndOfSimulation,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    ReachedFinalTime,
    EventHandlerRequestedTermination,
}

/// Engine outcome parked for replay on the next `advance_to` call.
///
/// `time` is the engine's actual internal time. When the advanced state was
/// backed up to an earlier return point, `saved_y` holds the continuous
/// vector at `time` so the next call can restore it.
#[derive(Debug)]
pub(crate) struct PendingReturn {
    pub(crate) outcome: StepOutcome,
    pub(crate) time: Real,
    pub(crate) saved_y: Option<DVector<f64>>,
}

/// Drives a `StepperEngine` over a `DynamicalSystem`.
pub struct Driver<S: DynamicalSystem, E: StepperEngine> {
    pub(crate) system: S,
    pub(crate) engine: E,
    pub(crate) config: DriverConfig,
    pub(crate) advanced: SimState,
    pub(crate) interpolated: Option<SimState>,
    pub(crate) use_interpolated: bool,
    pub(crate) initialized: bool,
    pub(crate) projection_chosen: bool,
    pub(crate) start_of_continuous_interval: bool,
    pub(crate) pending: Option<PendingReturn>,
    pub(crate) previous_start_time: Real,
    pub(crate) triggered: Vec<EventRecord>,
    pub(crate) event_window: Option<(Real, Real)>,
    pub(crate) termination_reason: Option<TerminationReason>,
}

impl<S: DynamicalSystem, E: StepperEngine> Driver<S, E> {
    /// Advance to `report_time`, stopping early at `scheduled_event_time` if
    /// one is given, at any trigger sign change, at the configured final
    /// time, or when the internal step limit runs out.
    ///
    /// Precedence when several land on the same call: report time first (if
    /// no scheduled event precedes it), then scheduled event, then final
    /// time, then trigger.
    pub fn advance_to(
        &mut self,
        report_time: Real,
        scheduled_event_time: Option<Real>,
    ) -> DriverResult<StepStatus> {
        if !self.initialized {
            return Err(DriverError::NotInitialized);
        }
        ensure_finite(report_time, "report_time")?;
        if report_time < self.state().time {
            return Err(DriverError::InvalidArg {
                what: "report_time must not precede the last reported time",
            });
        }
        if let Some(t) = scheduled_event_time {
            ensure_finite(t, "scheduled_event_time")?;
            if t < self.state().time {
                return Err(DriverError::InvalidArg {
                    what: "scheduled_event_time must not precede the current time",
                });
            }
        }

        // The start of a continuous interval is reported immediately so the
        // current state is seen as part of the trajectory.
        if self.start_of_continuous_interval {
            self.start_of_continuous_interval = false;
            return Ok(StepStatus::StartOfContinuousInterval);
        }

        let scheduled = scheduled_event_time.unwrap_or(Real::INFINITY);
        let t_max = report_time.min(scheduled);
        let mode = match (
            self.config.final_time.is_some(),
            self.config.return_every_internal_step,
        ) {
            (true, true) => StepMode::OneStepTstop,
            (true, false) => StepMode::NormalTstop,
            (false, true) => StepMode::OneStep,
            (false, false) => StepMode::Normal,
        };

        loop {
            let (outcome, tret) = match self.pending.take() {
                Some(p) => {
                    // The engine already went past the last reported time.
                    // Put things back the way they were after its last step
                    // and reclassify against the new targets.
                    if let Some(saved) = p.saved_y {
                        self.advanced.y = saved;
                    }
                    (p.outcome, p.time)
                }
                None => {
                    let t_start = self.advanced.time;
                    self.previous_start_time = t_start;
                    let dim = self.advanced.dim();
                    let mut yout = DVector::zeros(dim);
                    let mut ypout = DVector::zeros(dim);
                    let mut adapter = ModelAdapter::new(
                        &self.system,
                        &mut self.advanced,
                        self.config.constraint_tolerance,
                    );
                    let (outcome, tret) = self
                        .engine
                        .step(&mut adapter, t_max, mode, &mut yout, &mut ypout)
                        .map_err(|source| DriverError::StepFailed {
                            time: t_start,
                            source,
                        })?;
                    self.advanced.y.copy_from(&yout);
                    trace!(t = tret, ?outcome, "engine step returned");
                    (outcome, tret)
                }
            };
            self.advanced.time = tret;
            self.advanced.invalidate(Stage::Structure);
            self.realize_advanced()?;

            if outcome == StepOutcome::TooMuchWork {
                debug!(t = tret, "internal step limit reached");
                return Ok(StepStatus::ReachedStepLimit);
            }

            // If the engine overshot the target, report an interpolated
            // state at the target instead of the advanced state.
            if tret > t_max {
                let mut interp =
                    create_interpolated_state(&self.engine, &self.advanced, t_max)?;
                self.realize_state(&mut interp)?;
                self.interpolated = Some(interp);
                self.use_interpolated = true;
            } else {
                self.use_interpolated = false;
            }

            if tret >= report_time && report_time <= scheduled {
                self.pending = Some(PendingReturn {
                    outcome,
                    time: tret,
                    saved_y: None,
                });
                return Ok(StepStatus::ReachedReportTime);
            }
            if tret >= scheduled {
                let saved_y = if tret > scheduled {
                    // Back the advanced state up to the event time so the
                    // handler sees exact event-time values.
                    let saved = self.advanced.y.clone();
                    let interp = self
                        .interpolated
                        .as_ref()
                        .ok_or(DriverError::InvalidArg {
                            what: "overshoot without interpolated state",
                        })?;
                    self.advanced.y.copy_from(&interp.y);
                    self.advanced.time = scheduled;
                    self.advanced.invalidate(Stage::Structure);
                    self.realize_advanced()?;
                    Some(saved)
                } else {
                    None
                };
                self.pending = Some(PendingReturn {
                    outcome,
                    time: tret,
                    saved_y,
                });
                return Ok(StepStatus::ReachedScheduledEvent);
            }
            if outcome == StepOutcome::TstopReturn {
                self.termination_reason = Some(TerminationReason::ReachedFinalTime);
                return Ok(StepStatus::EndOfSimulation);
            }
            if outcome == StepOutcome::RootReturn {
                self.triggered =
                    collect_triggered(self.engine.root_info(), &self.system, tret);
                self.event_window = Some((self.previous_start_time, tret));
                debug!(t = tret, n = self.triggered.len(), "event triggers fired");
                return Ok(StepStatus::ReachedEventTrigger);
            }
            if self.config.return_every_internal_step {
                return Ok(StepStatus::TimeHasAdvanced);
            }
        }
    }

    /// The state to report to the caller: the interpolated state when the
    /// last return landed inside an overshooting step, otherwise the
    /// advanced state.
    pub fn state(&self) -> &SimState {
        if self.use_interpolated {
            if let Some(interp) = &self.interpolated {
                return interp;
            }
        }
        &self.advanced
    }

    /// The engine's furthest-advanced state.
    pub fn advanced_state(&self) -> &SimState {
        &self.advanced
    }

    /// Mutable access for event handlers; call `reinitialize` afterwards
    /// with the lowest stage that was modified.
    pub fn advanced_state_mut(&mut self) -> &mut SimState {
        &mut self.advanced
    }

    pub fn time(&self) -> Real {
        self.state().time
    }

    /// Events identified by the most recent `ReachedEventTrigger` return.
    pub fn triggered_events(&self) -> &[EventRecord] {
        &self.triggered
    }

    /// The (start, end) interval localizing the most recent triggers.
    pub fn event_window(&self) -> Option<(Real, Real)> {
        self.event_window
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    // Statistics, delegated to the engine session.

    pub fn num_steps_attempted(&self) -> u64 {
        self.engine.stats().steps_attempted
    }

    pub fn num_steps_taken(&self) -> u64 {
        self.engine.stats().steps_taken
    }

    pub fn num_error_test_failures(&self) -> u64 {
        self.engine.stats().error_test_failures
    }

    pub fn step_stats(&self) -> StepStats {
        self.engine.stats()
    }

    pub fn actual_initial_step_taken(&self) -> Option<Real> {
        self.engine.actual_initial_step()
    }

    pub fn previous_step_size_taken(&self) -> Option<Real> {
        self.engine.last_step_size()
    }

    pub fn predicted_next_step_size(&self) -> Option<Real> {
        self.engine.predicted_next_step_size()
    }

    pub(crate) fn realize_advanced(&mut self) -> DriverResult<()> {
        self.system
            .realize(&mut self.advanced, Stage::Acceleration)
            .map_err(|source| DriverError::ModelEvaluation {
                time: self.advanced.time,
                source,
            })
    }

    fn realize_state(&self, state: &mut SimState) -> DriverResult<()> {
        self.system
            .realize(state, Stage::Acceleration)
            .map_err(|source| DriverError::ModelEvaluation {
                time: state.time,
                source,
            })
    }
}
