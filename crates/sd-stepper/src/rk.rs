//! Built-in adaptive Runge-Kutta stepper engine.
//!
//! Dormand-Prince 5(4) explicit pair with:
//! - WRMS error control and a PI-style step-size factor
//! - FSAL (first stage same as last) derivative reuse
//! - cubic-Hermite dense output over the last taken step
//! - event-trigger sign-change detection with bisection localization
//! - exact stop-time landing in the `*Tstop` modes
//! - per-N-step constraint projection through the problem callback

use nalgebra::DVector;
use sd_core::{ensure_finite, Real, Tolerances};
use tracing::{debug, trace};

use crate::engine::{StepMode, StepOutcome, StepStats, StepperEngine};
use crate::error::{StepperError, StepperResult};
use crate::problem::{CallbackStatus, OdeProblem};

// Dormand-Prince 5(4) tableau
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

// 5th-order weights (advancing solution)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// 4th-order embedded weights
const BE1: f64 = 5179.0 / 57600.0;
const BE3: f64 = 7571.0 / 16695.0;
const BE4: f64 = 393.0 / 640.0;
const BE5: f64 = -92097.0 / 339200.0;
const BE6: f64 = 187.0 / 2100.0;
const BE7: f64 = 1.0 / 40.0;

// Error weights: y5 - y4
const E1: f64 = B1 - BE1;
const E3: f64 = B3 - BE3;
const E4: f64 = B4 - BE4;
const E5: f64 = B5 - BE5;
const E6: f64 = B6 - BE6;
const E7: f64 = -BE7;

/// Projection configuration for an engine session.
#[derive(Clone, Copy, Debug)]
enum Projection {
    /// Engine-managed: projects the error estimate in place too.
    Managed { tolerance: Real },
    /// Problem-defined: correction only, error estimate untouched.
    Custom,
}

/// Outcome of a single step attempt.
enum Attempt {
    Accepted {
        y_new: DVector<f64>,
        f_new: DVector<f64>,
        err_est: DVector<f64>,
        err_norm: f64,
    },
    ErrorTestFailed {
        err_norm: f64,
    },
    Recoverable,
}

/// Adaptive Dormand-Prince 5(4) stepper engine.
pub struct RkStepper {
    // configuration
    tol: Tolerances,
    h_init: Option<Real>,
    h_min: Real,
    h_max: Real,
    stop_time: Option<Real>,
    max_steps: usize,
    projection: Option<Projection>,
    proj_frequency: usize,
    n_roots: usize,

    // carried session state: last taken step is [t_prev, t]
    initialized: bool,
    t: Real,
    y: DVector<f64>,
    f: DVector<f64>,
    t_prev: Real,
    y_prev: DVector<f64>,
    f_prev: DVector<f64>,
    /// Proposed size for the next step attempt; 0 means "not yet chosen".
    h: Real,
    /// Trigger values at `t`, for sign-change detection across steps.
    g: Option<DVector<f64>>,
    root_flags: Vec<bool>,
    steps_since_projection: usize,

    first_step: Option<Real>,
    last_step: Option<Real>,

    stats: StepStats,
}

impl Default for RkStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl RkStepper {
    pub fn new() -> Self {
        Self {
            tol: Tolerances::default(),
            h_init: None,
            h_min: 1e-14,
            h_max: f64::INFINITY,
            stop_time: None,
            max_steps: 500,
            projection: None,
            proj_frequency: 1,
            n_roots: 0,
            initialized: false,
            t: 0.0,
            y: DVector::zeros(0),
            f: DVector::zeros(0),
            t_prev: 0.0,
            y_prev: DVector::zeros(0),
            f_prev: DVector::zeros(0),
            h: 0.0,
            g: None,
            root_flags: Vec::new(),
            steps_since_projection: 0,
            first_step: None,
            last_step: None,
            stats: StepStats::default(),
        }
    }

    fn establish(
        &mut self,
        t0: Real,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
        tol: Tolerances,
    ) -> StepperResult<()> {
        ensure_finite(t0, "t0")?;
        if y0.len() != ydot0.len() {
            return Err(StepperError::InvalidArg {
                what: "y0 and ydot0 must have the same length",
            });
        }
        if tol.rel <= 0.0 || tol.abs <= 0.0 {
            return Err(StepperError::InvalidArg {
                what: "tolerances must be positive",
            });
        }
        self.tol = tol;
        self.t = t0;
        self.y = y0.clone();
        self.f = ydot0.clone();
        self.t_prev = t0;
        self.y_prev = y0.clone();
        self.f_prev = ydot0.clone();
        self.h = 0.0;
        self.g = None;
        self.root_flags = vec![false; self.n_roots];
        self.steps_since_projection = 0;
        self.first_step = None;
        self.last_step = None;
        self.initialized = true;
        Ok(())
    }

    /// Hard floor below which retrying cannot make progress, even when the
    /// configured minimum step is zero.
    fn retry_floor(&self) -> Real {
        self.h_min.max(100.0 * f64::EPSILON * self.t.abs().max(1.0))
    }

    fn initial_step_size(&self, t_max: Real) -> Real {
        if let Some(h0) = self.h_init {
            return h0.clamp(self.h_min, self.h_max);
        }
        // cap the heuristic so a huge target span cannot produce a
        // non-finite or absurd first trial step
        let span = (t_max - self.t).abs();
        let guess = if span > 0.0 {
            (span * 1e-3).min(1.0)
        } else {
            1e-3
        };
        guess.clamp(self.h_min, self.h_max)
    }

    /// Attempt one step of size `h` from the carried (t, y, f).
    fn attempt(&mut self, problem: &mut dyn OdeProblem, h: Real) -> StepperResult<Attempt> {
        let n = self.y.len();
        let t = self.t;
        let k1 = &self.f; // FSAL
        let mut k2 = DVector::zeros(n);
        let mut k3 = DVector::zeros(n);
        let mut k4 = DVector::zeros(n);
        let mut k5 = DVector::zeros(n);
        let mut k6 = DVector::zeros(n);
        let mut k7 = DVector::zeros(n);
        let mut y_tmp = DVector::zeros(n);
        let mut y_new = DVector::zeros(n);

        self.stats.steps_attempted += 1;

        for i in 0..n {
            y_tmp[i] = self.y[i] + h * A21 * k1[i];
        }
        if !problem.derivative(t + C2 * h, &y_tmp, &mut k2).is_ok() {
            return Ok(Attempt::Recoverable);
        }

        for i in 0..n {
            y_tmp[i] = self.y[i] + h * (A31 * k1[i] + A32 * k2[i]);
        }
        if !problem.derivative(t + C3 * h, &y_tmp, &mut k3).is_ok() {
            return Ok(Attempt::Recoverable);
        }

        for i in 0..n {
            y_tmp[i] = self.y[i] + h * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        if !problem.derivative(t + C4 * h, &y_tmp, &mut k4).is_ok() {
            return Ok(Attempt::Recoverable);
        }

        for i in 0..n {
            y_tmp[i] =
                self.y[i] + h * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        if !problem.derivative(t + C5 * h, &y_tmp, &mut k5).is_ok() {
            return Ok(Attempt::Recoverable);
        }

        for i in 0..n {
            y_tmp[i] = self.y[i]
                + h * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        if !problem.derivative(t + h, &y_tmp, &mut k6).is_ok() {
            return Ok(Attempt::Recoverable);
        }

        // 5th-order solution
        for i in 0..n {
            y_new[i] = self.y[i]
                + h * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }

        // FSAL stage at the step end
        if !problem.derivative(t + h, &y_new, &mut k7).is_ok() {
            return Ok(Attempt::Recoverable);
        }

        // WRMS error norm against the embedded 4th-order solution
        let mut err_est = DVector::zeros(n);
        let mut err_norm = 0.0;
        for i in 0..n {
            let ei = h
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
            err_est[i] = ei;
            let sc = self.tol.scale(self.y[i].abs().max(y_new[i].abs()));
            err_norm += (ei / sc) * (ei / sc);
        }
        err_norm = (err_norm / n.max(1) as f64).sqrt();

        if err_norm <= 1.0 {
            Ok(Attempt::Accepted {
                y_new,
                f_new: k7,
                err_est,
                err_norm,
            })
        } else {
            Ok(Attempt::ErrorTestFailed { err_norm })
        }
    }

    /// Localize the earliest trigger crossing in the last taken step and
    /// rewind the carried state to the crossing time.
    ///
    /// `g_lo` holds trigger values at the step start, `g_hi` at the step end;
    /// at least one component must have crossed between them.
    fn locate_root(
        &mut self,
        problem: &mut dyn OdeProblem,
        g_lo_in: &DVector<f64>,
        g_hi_in: &DVector<f64>,
    ) -> StepperResult<()> {
        let n = self.y.len();
        let mut t_lo = self.t_prev;
        let mut t_hi = self.t;
        let mut g_lo = g_lo_in.clone();
        let mut g_hi = g_hi_in.clone();
        let mut y_mid = DVector::zeros(n);
        let mut yp_mid = DVector::zeros(n);
        let mut g_mid = DVector::zeros(self.n_roots);

        let t_tol = 100.0 * f64::EPSILON * t_lo.abs().max(t_hi.abs()).max(1.0);
        while t_hi - t_lo > t_tol {
            let t_mid = 0.5 * (t_lo + t_hi);
            if t_mid <= t_lo || t_mid >= t_hi {
                break;
            }
            self.dense_output(t_mid, 0, &mut y_mid)?;
            self.dense_output(t_mid, 1, &mut yp_mid)?;
            if !problem.root(t_mid, &y_mid, &yp_mid, &mut g_mid).is_ok() {
                return Err(StepperError::RepeatedRecoverableFailure { time: t_mid });
            }
            let crossed_left = (0..self.n_roots).any(|i| sign_crossed(g_lo[i], g_mid[i]));
            if crossed_left {
                t_hi = t_mid;
                g_hi.copy_from(&g_mid);
            } else {
                t_lo = t_mid;
                g_lo.copy_from(&g_mid);
            }
        }

        for i in 0..self.n_roots {
            self.root_flags[i] = sign_crossed(g_lo[i], g_hi[i]);
        }

        // Rewind the carried state to the root time; dense output over
        // [t_prev, t_root] stays valid because t_prev is untouched.
        self.dense_output(t_hi, 0, &mut y_mid)?;
        self.dense_output(t_hi, 1, &mut yp_mid)?;
        let mut f_root = DVector::zeros(n);
        if !problem.derivative(t_hi, &y_mid, &mut f_root).is_ok() {
            // interpolated derivative is accurate enough to restart from
            f_root.copy_from(&yp_mid);
        }
        debug!(t_root = t_hi, "trigger crossing localized");
        self.t = t_hi;
        self.y.copy_from(&y_mid);
        self.f = f_root;
        self.last_step = Some(self.t - self.t_prev);
        // Carry the post-crossing trigger signs so the crossing is not
        // reported again on the next step.
        self.g = Some(g_hi);
        Ok(())
    }

    fn write_out(&self, yout: &mut DVector<f64>, ypout: &mut DVector<f64>) {
        yout.copy_from(&self.y);
        ypout.copy_from(&self.f);
    }
}

impl StepperEngine for RkStepper {
    fn init(
        &mut self,
        t0: Real,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
        tol: Tolerances,
    ) -> StepperResult<()> {
        self.stats = StepStats::default();
        self.establish(t0, y0, ydot0, tol)
    }

    fn reinit(
        &mut self,
        t0: Real,
        y0: &DVector<f64>,
        ydot0: &DVector<f64>,
        tol: Tolerances,
    ) -> StepperResult<()> {
        if !self.initialized {
            return Err(StepperError::NotInitialized);
        }
        // statistics and configuration survive a reinit
        self.establish(t0, y0, ydot0, tol)
    }

    fn step(
        &mut self,
        problem: &mut dyn OdeProblem,
        t_max: Real,
        mode: StepMode,
        yout: &mut DVector<f64>,
        ypout: &mut DVector<f64>,
    ) -> StepperResult<(StepOutcome, Real)> {
        if !self.initialized {
            return Err(StepperError::NotInitialized);
        }
        if !t_max.is_finite() && !mode.one_step() {
            return Err(StepperError::InvalidArg {
                what: "t_max must be finite in Normal modes",
            });
        }

        self.root_flags.iter_mut().for_each(|flag| *flag = false);

        // Trigger values at the session start, evaluated lazily so init does
        // not need the problem.
        if self.n_roots > 0 && self.g.is_none() {
            let mut g0 = DVector::zeros(self.n_roots);
            if !problem.root(self.t, &self.y, &self.f, &mut g0).is_ok() {
                return Err(StepperError::RepeatedRecoverableFailure { time: self.t });
            }
            self.g = Some(g0);
        }

        if self.h <= 0.0 {
            self.h = self.initial_step_size(t_max);
        }

        let mut taken_this_call = 0usize;

        loop {
            let mut h = self.h.clamp(self.h_min, self.h_max);

            // Clamp against the stop time so it is hit exactly.
            let mut hit_stop = false;
            let mut stop = 0.0;
            if mode.honors_stop_time() {
                if let Some(ts) = self.stop_time {
                    if ts <= self.t {
                        self.write_out(yout, ypout);
                        return Ok((StepOutcome::TstopReturn, ts));
                    }
                    if self.t + h >= ts {
                        h = ts - self.t;
                        hit_stop = true;
                        stop = ts;
                    }
                }
            }

            match self.attempt(problem, h)? {
                Attempt::Recoverable => {
                    trace!(t = self.t, h, "recoverable evaluation failure, halving step");
                    self.h = h * 0.5;
                    if self.h < self.retry_floor() {
                        return Err(StepperError::RepeatedRecoverableFailure { time: self.t });
                    }
                    continue;
                }
                Attempt::ErrorTestFailed { err_norm } => {
                    self.stats.error_test_failures += 1;
                    if h <= self.retry_floor() * (1.0 + 1e-12) {
                        return Err(StepperError::StepSizeUnderflow {
                            time: self.t,
                            what: "error test failed at the minimum step size",
                        });
                    }
                    self.h = (h * step_factor(err_norm)).max(self.h_min);
                    continue;
                }
                Attempt::Accepted {
                    mut y_new,
                    f_new,
                    mut err_est,
                    err_norm,
                } => {
                    let t_new = if hit_stop { stop } else { self.t + h };

                    // Constraint projection, per configured frequency.
                    let mut projected = false;
                    if let Some(proj) = self.projection {
                        if self.steps_since_projection + 1 >= self.proj_frequency.max(1) {
                            let mut ycorr = DVector::zeros(y_new.len());
                            let status = match proj {
                                Projection::Managed { tolerance } => problem.project(
                                    t_new,
                                    &y_new,
                                    &mut ycorr,
                                    tolerance,
                                    Some(&mut err_est),
                                ),
                                Projection::Custom => {
                                    problem.project(t_new, &y_new, &mut ycorr, self.tol.rel, None)
                                }
                            };
                            match status {
                                CallbackStatus::Ok => {
                                    y_new += &ycorr;
                                    projected = true;
                                }
                                CallbackStatus::Recoverable => {
                                    trace!(t = self.t, h, "projection failed, halving step");
                                    self.h = h * 0.5;
                                    if self.h < self.retry_floor() {
                                        return Err(StepperError::RepeatedRecoverableFailure {
                                            time: self.t,
                                        });
                                    }
                                    continue;
                                }
                            }
                        }
                    }

                    // Commit the step.
                    self.y_prev = std::mem::replace(&mut self.y, y_new);
                    self.f_prev = std::mem::replace(&mut self.f, f_new);
                    self.t_prev = self.t;
                    self.t = t_new;
                    self.stats.steps_taken += 1;
                    taken_this_call += 1;
                    self.last_step = Some(h);
                    if self.first_step.is_none() {
                        self.first_step = Some(h);
                    }
                    self.steps_since_projection = if projected {
                        0
                    } else {
                        self.steps_since_projection + 1
                    };
                    self.h = (h * step_factor(err_norm)).clamp(self.h_min, self.h_max);
                    trace!(t = self.t, h, err_norm, "step accepted");

                    // Trigger sign-change check over the committed step.
                    if self.n_roots > 0 {
                        let mut g_new = DVector::zeros(self.n_roots);
                        if !problem.root(self.t, &self.y, &self.f, &mut g_new).is_ok() {
                            return Err(StepperError::RepeatedRecoverableFailure {
                                time: self.t,
                            });
                        }
                        let g_old = self.g.take().unwrap_or_else(|| g_new.clone());
                        let any_crossing =
                            (0..self.n_roots).any(|i| sign_crossed(g_old[i], g_new[i]));
                        if any_crossing {
                            self.locate_root(problem, &g_old, &g_new)?;
                            self.write_out(yout, ypout);
                            return Ok((StepOutcome::RootReturn, self.t));
                        }
                        self.g = Some(g_new);
                    }

                    if hit_stop {
                        self.write_out(yout, ypout);
                        return Ok((StepOutcome::TstopReturn, self.t));
                    }
                    if mode.one_step() || self.t >= t_max {
                        self.write_out(yout, ypout);
                        return Ok((StepOutcome::Success, self.t));
                    }
                    if taken_this_call >= self.max_steps {
                        debug!(
                            t = self.t,
                            t_max, taken_this_call, "step-count limit reached"
                        );
                        self.write_out(yout, ypout);
                        return Ok((StepOutcome::TooMuchWork, self.t));
                    }
                }
            }
        }
    }

    fn dense_output(&self, t: Real, order: u8, out: &mut DVector<f64>) -> StepperResult<()> {
        if !self.initialized {
            return Err(StepperError::NotInitialized);
        }
        let (t0, t1) = (self.t_prev, self.t);
        let span = t1 - t0;
        let slack = 100.0 * f64::EPSILON * t0.abs().max(t1.abs()).max(1.0);
        if t < t0 - slack || t > t1 + slack {
            return Err(StepperError::DenseOutputOutOfRange {
                time: t,
                lo: t0,
                hi: t1,
            });
        }
        if span <= 0.0 {
            // no step taken yet; only the session point itself is available
            match order {
                0 => out.copy_from(&self.y),
                1 => out.copy_from(&self.f),
                _ => {
                    return Err(StepperError::InvalidArg {
                        what: "dense output order must be 0 or 1",
                    });
                }
            }
            return Ok(());
        }
        let theta = ((t - t0) / span).clamp(0.0, 1.0);
        match order {
            0 => hermite_value(theta, span, &self.y_prev, &self.f_prev, &self.y, &self.f, out),
            1 => hermite_derivative(
                theta,
                span,
                &self.y_prev,
                &self.f_prev,
                &self.y,
                &self.f,
                out,
            ),
            _ => {
                return Err(StepperError::InvalidArg {
                    what: "dense output order must be 0 or 1",
                });
            }
        }
        Ok(())
    }

    fn root_init(&mut self, count: usize) {
        self.n_roots = count;
        self.root_flags = vec![false; count];
        self.g = None;
    }

    fn root_info(&self) -> &[bool] {
        &self.root_flags
    }

    fn proj_init(&mut self, tolerance: Real) {
        self.projection = Some(Projection::Managed { tolerance });
    }

    fn proj_define(&mut self) {
        self.projection = Some(Projection::Custom);
    }

    fn set_initial_step(&mut self, h: Real) {
        self.h_init = Some(h);
    }

    fn set_min_step(&mut self, h: Real) {
        self.h_min = h.max(0.0);
    }

    fn set_max_step(&mut self, h: Real) {
        self.h_max = h;
    }

    fn set_stop_time(&mut self, t: Real) {
        self.stop_time = Some(t);
    }

    fn set_max_steps(&mut self, n: usize) {
        self.max_steps = n.max(1);
    }

    fn set_proj_frequency(&mut self, every_n_steps: usize) {
        self.proj_frequency = every_n_steps.max(1);
    }

    fn actual_initial_step(&self) -> Option<Real> {
        self.first_step
    }

    fn last_step_size(&self) -> Option<Real> {
        self.last_step
    }

    fn predicted_next_step_size(&self) -> Option<Real> {
        if self.h > 0.0 { Some(self.h) } else { None }
    }

    fn stats(&self) -> StepStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = StepStats::default();
    }
}

/// Step-size multiplier from the WRMS error norm of the last attempt.
fn step_factor(err_norm: f64) -> f64 {
    if err_norm == 0.0 {
        5.0
    } else {
        (0.9 * err_norm.powf(-0.2)).clamp(0.2, 5.0)
    }
}

/// True when g moved from a nonzero value to the opposite sign or to zero.
/// A zero left endpoint is not a crossing, so a localized root is not
/// reported again on the following step.
fn sign_crossed(a: f64, b: f64) -> bool {
    if a == 0.0 {
        false
    } else {
        (a < 0.0 && b >= 0.0) || (a > 0.0 && b <= 0.0)
    }
}

/// Cubic Hermite interpolant over [t0, t0+h] at fraction `theta`.
fn hermite_value(
    theta: f64,
    h: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    y1: &DVector<f64>,
    f1: &DVector<f64>,
    out: &mut DVector<f64>,
) {
    let t2 = theta * theta;
    let t3 = t2 * theta;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + theta;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    for i in 0..out.len() {
        out[i] = h00 * y0[i] + h10 * h * f0[i] + h01 * y1[i] + h11 * h * f1[i];
    }
}

/// Time derivative of the cubic Hermite interpolant.
fn hermite_derivative(
    theta: f64,
    h: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    y1: &DVector<f64>,
    f1: &DVector<f64>,
    out: &mut DVector<f64>,
) {
    let t2 = theta * theta;
    let dh00 = (6.0 * t2 - 6.0 * theta) / h;
    let dh10 = 3.0 * t2 - 4.0 * theta + 1.0;
    let dh01 = (-6.0 * t2 + 6.0 * theta) / h;
    let dh11 = 3.0 * t2 - 2.0 * theta;
    for i in 0..out.len() {
        out[i] = dh00 * y0[i] + dh10 * f0[i] + dh01 * y1[i] + dh11 * f1[i];
    }
}
