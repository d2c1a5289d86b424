//! End-to-end driver test on a harmonic oscillator, x'' = -x, using the
//! built-in Runge-Kutta engine. The exact solution x = cos(t) gives known
//! report values and known trigger times (zero crossings at odd multiples
//! of pi/2).

use std::f64::consts::PI;

use nalgebra::DVector;
use sd_core::{nearly_equal, Tolerances};
use sd_driver::{
    Driver, DriverConfig, DriverError, DynamicalSystem, ModelError, SimState, Stage, StepStatus,
    TerminationReason,
};
use sd_stepper::RkStepper;

const REPORT_TOL: Tolerances = Tolerances {
    rel: 0.0,
    abs: 1e-4,
};

/// State y = [x, v] with v = x'. One trigger on x itself when enabled.
struct Oscillator {
    watch_zero_crossing: bool,
}

impl DynamicalSystem for Oscillator {
    fn dim(&self) -> usize {
        2
    }

    fn n_events(&self) -> usize {
        if self.watch_zero_crossing { 1 } else { 0 }
    }

    fn realize(&self, state: &mut SimState, stage: Stage) -> Result<(), ModelError> {
        if stage >= Stage::Acceleration {
            state.ydot[0] = state.y[1];
            state.ydot[1] = -state.y[0];
            if self.watch_zero_crossing {
                state.triggers[0] = state.y[0];
            }
        }
        state.stage = stage;
        Ok(())
    }
}

fn started(
    system: Oscillator,
    config: DriverConfig,
) -> Driver<Oscillator, RkStepper> {
    let n_events = system.n_events();
    let mut driver = Driver::new(system, RkStepper::new(), config);
    driver
        .initialize(SimState::new(
            0.0,
            DVector::from_vec(vec![1.0, 0.0]),
            0,
            n_events,
        ))
        .unwrap();
    assert_eq!(
        driver.advance_to(100.0, None).unwrap(),
        StepStatus::StartOfContinuousInterval
    );
    driver
}

#[test]
fn reports_land_on_requested_times_with_expected_accuracy() {
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: false,
        },
        DriverConfig::default(),
    );

    for k in 1..=6 {
        let t = 0.5 * k as f64;
        let status = driver.advance_to(t, None).unwrap();
        assert_eq!(status, StepStatus::ReachedReportTime);
        let state = driver.state();
        assert_eq!(state.time, t);
        assert!(
            nearly_equal(state.y[0], t.cos(), REPORT_TOL),
            "x({t}) = {} vs cos = {}",
            state.y[0],
            t.cos()
        );
        assert!(nearly_equal(state.y[1], -t.sin(), REPORT_TOL));
    }
    assert!(driver.num_steps_taken() > 0);
    assert!(driver.actual_initial_step_taken().is_some());
}

#[test]
fn zero_crossings_are_detected_in_order() {
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: true,
        },
        DriverConfig::default(),
    );

    // first crossing at pi/2
    let mut status = driver.advance_to(10.0, None).unwrap();
    while status == StepStatus::TimeHasAdvanced {
        status = driver.advance_to(10.0, None).unwrap();
    }
    assert_eq!(status, StepStatus::ReachedEventTrigger);
    let t1 = driver.time();
    assert!((t1 - PI / 2.0).abs() < 1e-4, "first crossing at {t1}");
    assert_eq!(driver.triggered_events().len(), 1);
    assert_eq!(driver.triggered_events()[0].id.index(), 0);
    let (w_lo, w_hi) = driver.event_window().unwrap();
    assert!(w_lo < t1 && (w_hi - t1).abs() < 1e-12);

    // resuming does not re-report the same crossing; the next one is 3pi/2
    let status = driver.advance_to(10.0, None).unwrap();
    assert_eq!(status, StepStatus::ReachedEventTrigger);
    let t2 = driver.time();
    assert!((t2 - 3.0 * PI / 2.0).abs() < 1e-4, "second crossing at {t2}");
}

#[test]
fn handler_edit_and_reinitialize_restart_the_trajectory() {
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: true,
        },
        DriverConfig::default(),
    );

    let status = driver.advance_to(10.0, None).unwrap();
    assert_eq!(status, StepStatus::ReachedEventTrigger);
    let t_event = driver.time();
    let steps_before = driver.num_steps_taken();

    // restart the oscillation from its peak at the event time
    {
        let state = driver.advanced_state_mut();
        state.y[0] = 1.0;
        state.y[1] = 0.0;
        state.invalidate(Stage::Structure);
    }
    driver.reinitialize(Stage::Position, false).unwrap();
    assert_eq!(
        driver.advance_to(10.0, None).unwrap(),
        StepStatus::StartOfContinuousInterval
    );

    // statistics survive the reinitialization
    assert_eq!(driver.num_steps_taken(), steps_before);

    // next crossing is a quarter period after the restart
    let status = driver.advance_to(10.0, None).unwrap();
    assert_eq!(status, StepStatus::ReachedEventTrigger);
    assert!((driver.time() - (t_event + PI / 2.0)).abs() < 1e-4);
}

#[test]
fn scheduled_event_time_is_landed_on_exactly() {
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: false,
        },
        DriverConfig::default(),
    );

    let status = driver.advance_to(10.0, Some(0.5)).unwrap();
    assert_eq!(status, StepStatus::ReachedScheduledEvent);
    let state = driver.state();
    assert_eq!(state.time, 0.5);
    assert!(nearly_equal(state.y[0], 0.5_f64.cos(), REPORT_TOL));
    // the advanced state was backed up to the event time as well
    assert_eq!(driver.advanced_state().time, 0.5);

    // the session resumes cleanly past the event
    let status = driver.advance_to(1.0, None).unwrap();
    assert_eq!(status, StepStatus::ReachedReportTime);
    assert_eq!(driver.time(), 1.0);
    assert!((driver.state().y[0] - 1.0_f64.cos()).abs() < 1e-4);
}

#[test]
fn final_time_ends_the_simulation_exactly() {
    let config = DriverConfig {
        final_time: Some(2.0),
        ..DriverConfig::default()
    };
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: false,
        },
        config,
    );

    let mut status = driver.advance_to(50.0, None).unwrap();
    while status == StepStatus::ReachedStepLimit {
        status = driver.advance_to(50.0, None).unwrap();
    }
    assert_eq!(status, StepStatus::EndOfSimulation);
    assert_eq!(driver.time(), 2.0);
    assert!((driver.state().y[0] - 2.0_f64.cos()).abs() < 1e-4);
    assert_eq!(
        driver.termination_reason(),
        Some(TerminationReason::ReachedFinalTime)
    );
}

#[test]
fn step_limit_interrupts_and_resumes() {
    let config = DriverConfig {
        internal_step_limit: Some(2),
        ..DriverConfig::default()
    };
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: false,
        },
        config,
    );

    let mut limit_returns = 0;
    let mut calls = 0;
    loop {
        match driver.advance_to(3.0, None).unwrap() {
            StepStatus::ReachedStepLimit => limit_returns += 1,
            StepStatus::ReachedReportTime => break,
            other => panic!("unexpected status {other:?}"),
        }
        calls += 1;
        assert!(calls < 10_000, "no progress toward the report time");
    }
    assert!(limit_returns >= 1);
    assert_eq!(driver.time(), 3.0);
    assert!((driver.state().y[0] - 3.0_f64.cos()).abs() < 1e-4);
}

#[test]
fn tighter_tolerances_track_the_solution_more_closely() {
    let run = |rel: f64, abs: f64| -> f64 {
        let config = DriverConfig {
            tolerances: sd_core::Tolerances { rel, abs },
            ..DriverConfig::default()
        };
        let mut driver = started(
            Oscillator {
                watch_zero_crossing: false,
            },
            config,
        );
        driver.advance_to(6.0, None).unwrap();
        (driver.state().y[0] - 6.0_f64.cos()).abs()
    };

    let loose = run(1e-3, 1e-6);
    let tight = run(1e-9, 1e-12);
    assert!(tight < loose, "tight {tight} not better than loose {loose}");
}

#[test]
fn non_finite_times_are_rejected() {
    let mut driver = started(
        Oscillator {
            watch_zero_crossing: false,
        },
        DriverConfig::default(),
    );

    assert!(matches!(
        driver.advance_to(f64::NAN, None),
        Err(DriverError::Core(_))
    ));
    assert!(matches!(
        driver.advance_to(1.0, Some(f64::INFINITY)),
        Err(DriverError::Core(_))
    ));
    // the session is untouched and still advances
    assert_eq!(
        driver.advance_to(1.0, None).unwrap(),
        StepStatus::ReachedReportTime
    );
}
