// src/excitation/twitch.rs

//! # Twitch Test Module
//!
//! Drives a bounded step command on the target axis and tracks the
//! running minimum and maximum of the measured rate and angle.  The
//! response peaks feed the gain update rules; exceeding the safety
//! bounds before the target is reached aborts the test and contracts
//! the step amplitude for the next attempt.

use crate::excitation::Progress;
use crate::policy::TestOutcome;
use crate::vehicle::{num, Axis, AttitudeControl, Number};

/// Measured rate beyond this multiple of the commanded step aborts.
pub const TWITCH_ABORT_RATE_MULTIPLIER: f32 = 2.0;
/// Attitude excursion beyond this angle aborts a rate twitch, degrees.
pub const TWITCH_ABORT_ANGLE_DEG: f32 = 30.0;
/// Step scaler contraction applied on abort.
const STEP_SCALER_SHRINK: f32 = 0.9;
/// Step scaler growth applied after a too-weak response.
const STEP_SCALER_BOOST: f32 = 1.1;
/// Lower bound of the step scaler.
const STEP_SCALER_MIN: f32 = 0.1;
/// Upper bound of the step scaler.
const STEP_SCALER_MAX: f32 = 2.0;
/// Fraction of the target past which bounce-back tracking starts.
const PEAK_TRACK_FRACTION: f32 = 0.5;

/// Step-twitch excitation with min/max peak tracking.
///
/// The step scaler persists across tests of one axis: aborts shrink it,
/// too-weak responses grow it back, so the twitch amplitude adapts to
/// the vehicle instead of failing outright.
#[derive(Debug, Clone)]
pub struct TwitchTest<T> {
    target: T,
    direction: T,
    angle_mode: bool,
    start_angle: T,
    rate_min: T,
    rate_max: T,
    angle_min: T,
    angle_max: T,
    accel_max: T,
    prev_rate: T,
    have_prev_rate: bool,
    step_scaler: T,
    start_time_ms: u32,
    time_limit_ms: u32,
}

impl<T: Number> TwitchTest<T> {
    /// Creates an idle twitch test with a unity step scaler.
    pub fn new() -> Self {
        TwitchTest {
            target: T::zero(),
            direction: T::one(),
            angle_mode: false,
            start_angle: T::zero(),
            rate_min: T::zero(),
            rate_max: T::zero(),
            angle_min: T::zero(),
            angle_max: T::zero(),
            accel_max: T::zero(),
            prev_rate: T::zero(),
            have_prev_rate: false,
            step_scaler: T::one(),
            start_time_ms: 0,
            time_limit_ms: 0,
        }
    }

    /// Restores the unity step scaler for a new axis.
    pub fn reset_scaler(&mut self) {
        self.step_scaler = T::one();
    }

    /// Current step scaler.
    pub fn step_scaler(&self) -> T {
        self.step_scaler
    }

    /// Contracts the step amplitude after an abort.
    pub fn shrink_step(&mut self) {
        self.step_scaler = (self.step_scaler * num(STEP_SCALER_SHRINK)).max(num(STEP_SCALER_MIN));
    }

    /// Grows the step amplitude after a too-weak response.
    pub fn boost_step(&mut self) {
        self.step_scaler = (self.step_scaler * num(STEP_SCALER_BOOST)).min(num(STEP_SCALER_MAX));
    }

    /// True if the step scaler cannot grow further.
    pub fn step_at_max(&self) -> bool {
        self.step_scaler >= num(STEP_SCALER_MAX)
    }

    /// Starts a rate twitch toward `target_rate * step_scaler` deg/s.
    pub fn init_rate(
        &mut self,
        target_rate: T,
        direction: T,
        start_angle: T,
        now_ms: u32,
        time_limit_ms: u32,
    ) {
        self.init_common(target_rate, direction, start_angle, now_ms, time_limit_ms);
        self.angle_mode = false;
    }

    /// Starts an angle twitch toward `target_angle * step_scaler` degrees.
    pub fn init_angle(
        &mut self,
        target_angle: T,
        direction: T,
        start_angle: T,
        now_ms: u32,
        time_limit_ms: u32,
    ) {
        self.init_common(target_angle, direction, start_angle, now_ms, time_limit_ms);
        self.angle_mode = true;
    }

    fn init_common(&mut self, target: T, direction: T, start_angle: T, now_ms: u32, limit: u32) {
        self.target = target * self.step_scaler;
        self.direction = direction;
        self.start_angle = start_angle;
        self.rate_min = T::zero();
        self.rate_max = T::zero();
        self.angle_min = T::zero();
        self.angle_max = T::zero();
        self.accel_max = T::zero();
        self.prev_rate = T::zero();
        self.have_prev_rate = false;
        self.start_time_ms = now_ms;
        self.time_limit_ms = limit;
    }

    /// Drives the step for one tick and updates the peak trackers.
    pub fn run<C: AttitudeControl<T>>(
        &mut self,
        ctrl: &mut C,
        axis: Axis,
        now_ms: u32,
        dt: T,
    ) -> Progress {
        if self.angle_mode {
            ctrl.input_angle_step(axis, self.direction * self.target);
        } else {
            ctrl.input_rate_step(axis, self.direction * self.target);
        }

        // Normalise measurements so positive is the commanded direction.
        let rate = self.direction * ctrl.measured_rate(axis);
        let angle = self.direction * (ctrl.measured_angle(axis) - self.start_angle);
        self.measure_acceleration(rate, dt);

        if self.angle_mode {
            self.track_peaks_angle(angle, rate);
            if rate.abs() > num::<T>(TWITCH_ABORT_RATE_MULTIPLIER) * self.expected_peak_rate() {
                self.shrink_step();
                return Progress::Aborted;
            }
            if self.angle_max >= self.target {
                return Progress::Complete;
            }
        } else {
            self.track_peaks_rate(rate, angle);
            if rate > self.target * num(TWITCH_ABORT_RATE_MULTIPLIER) {
                self.shrink_step();
                return Progress::Aborted;
            }
            if angle.abs() > num(TWITCH_ABORT_ANGLE_DEG) {
                self.shrink_step();
                return Progress::Aborted;
            }
            if self.rate_max >= self.target {
                return Progress::Complete;
            }
        }

        if now_ms.wrapping_sub(self.start_time_ms) >= self.time_limit_ms {
            return Progress::Complete;
        }
        Progress::Running
    }

    /// Peak response summary of the completed test.
    pub fn outcome(&self) -> TestOutcome<T> {
        TestOutcome::Twitch {
            target: self.target,
            rate_min: self.rate_min,
            rate_max: self.rate_max,
            angle_min: self.angle_min,
            angle_max: self.angle_max,
        }
    }

    /// Peak angular acceleration seen during the test, deg/s^2.
    pub fn accel_max(&self) -> T {
        self.accel_max
    }

    fn track_peaks_rate(&mut self, rate: T, angle: T) {
        if rate > self.rate_max {
            self.rate_max = rate;
            self.rate_min = rate;
        } else if rate < self.rate_min && self.rate_max > self.target * num(PEAK_TRACK_FRACTION) {
            // Bounce-back after the peak carries the overshoot signal.
            self.rate_min = rate;
        }
        if angle > self.angle_max {
            self.angle_max = angle;
        }
        if angle < self.angle_min {
            self.angle_min = angle;
        }
    }

    fn track_peaks_angle(&mut self, angle: T, rate: T) {
        if angle > self.angle_max {
            self.angle_max = angle;
            self.angle_min = angle;
        } else if angle < self.angle_min && self.angle_max > self.target * num(PEAK_TRACK_FRACTION)
        {
            self.angle_min = angle;
        }
        if rate > self.rate_max {
            self.rate_max = rate;
        }
        if rate < self.rate_min {
            self.rate_min = rate;
        }
    }

    // Angle twitches have no commanded rate; bound the abort check by
    // the rate an ideal step of this size would reach in one second.
    fn expected_peak_rate(&self) -> T {
        self.target.max(num(45.0))
    }

    fn measure_acceleration(&mut self, rate: T, dt: T) {
        if dt <= T::zero() {
            return;
        }
        if self.have_prev_rate {
            let accel = ((rate - self.prev_rate) / dt).abs();
            if accel > self.accel_max {
                self.accel_max = accel;
            }
        }
        self.prev_rate = rate;
        self.have_prev_rate = true;
    }
}

impl<T: Number> Default for TwitchTest<T> {
    fn default() -> Self {
        Self::new()
    }
}
