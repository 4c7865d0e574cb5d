// src/excitation/dwell.rs

//! # Dwell Test Module
//!
//! Sinusoidal excitation at a fixed frequency.  The command and the
//! measured response are low-pass filtered at twice the excitation
//! frequency and fed to the [`FrequencyResponse`] estimator, which
//! reports the (gain, phase) point once enough stable cycles have been
//! seen.  Angle dwells additionally watch for motor saturation, which
//! invalidates the linearity assumption behind the estimate.
//!
//! The feedforward test lives here too: a sustained constant-rate
//! command whose steady-state output-to-rate ratio identifies the rate
//! feedforward gain directly.

use crate::excitation::Progress;
use crate::filter::LowPassFilter;
use crate::frequency::{FrequencyResponse, DWELL_CYCLES};
use crate::policy::TestOutcome;
use crate::vehicle::{num, Axis, AttitudeControl, Number};

/// Filter cutoff multiple of the excitation frequency.
const DWELL_FILTER_MULTIPLE: f32 = 2.0;
/// Excitation periods allowed beyond the nominal cycle count before the
/// dwell times out.
const DWELL_TIMEOUT_EXTRA_CYCLES: usize = 3;

/// Time spent settling into the constant-rate command, seconds.
const FF_SETTLE_S: f32 = 0.25;
/// Time spent measuring the steady-state ratio, seconds.
const FF_MEASURE_S: f32 = 0.75;
/// Filter cutoff for the feedforward steady-state signals, Hz.
const FF_FILTER_HZ: f32 = 5.0;

/// Phase of the feedforward test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FfPhase {
    Settle,
    Measure,
    Return,
}

/// Sinusoidal dwell at one frequency with frequency-response estimation.
#[derive(Debug, Clone)]
pub struct DwellTest<T> {
    freq_hz: T,
    amplitude: T,
    angle_mode: bool,
    phase: T,
    command_filter: LowPassFilter<T>,
    response_filter: LowPassFilter<T>,
    response: FrequencyResponse<T>,
    elapsed: T,
    saturated: bool,
    running: bool,
}

impl<T: Number> DwellTest<T> {
    /// Creates an idle dwell test.
    pub fn new() -> Self {
        DwellTest {
            freq_hz: T::zero(),
            amplitude: T::zero(),
            angle_mode: false,
            phase: T::zero(),
            command_filter: LowPassFilter::new(T::zero()),
            response_filter: LowPassFilter::new(T::zero()),
            response: FrequencyResponse::new(T::zero()),
            elapsed: T::zero(),
            saturated: false,
            running: false,
        }
    }

    /// Starts a rate dwell of `amplitude` deg/s at `freq_hz`.
    pub fn init_rate(&mut self, freq_hz: T, amplitude: T) {
        self.init_common(freq_hz, amplitude);
        self.angle_mode = false;
    }

    /// Starts an angle dwell of `amplitude` degrees at `freq_hz`.
    pub fn init_angle(&mut self, freq_hz: T, amplitude: T) {
        self.init_common(freq_hz, amplitude);
        self.angle_mode = true;
    }

    fn init_common(&mut self, freq_hz: T, amplitude: T) {
        self.freq_hz = freq_hz;
        self.amplitude = amplitude;
        self.phase = T::zero();
        let cutoff = freq_hz * num(DWELL_FILTER_MULTIPLE);
        self.command_filter = LowPassFilter::new(cutoff);
        self.response_filter = LowPassFilter::new(cutoff);
        self.response.reset(freq_hz);
        self.elapsed = T::zero();
        self.saturated = false;
        self.running = true;
    }

    /// Excitation frequency of the current dwell, Hz.
    pub fn frequency(&self) -> T {
        self.freq_hz
    }

    /// Drives the sinusoid for one tick and feeds the estimator.
    pub fn run<C: AttitudeControl<T>>(&mut self, ctrl: &mut C, axis: Axis, dt: T) -> Progress {
        if !self.running || self.freq_hz <= T::zero() {
            return Progress::Aborted;
        }
        let command = self.amplitude * self.phase.sin();
        self.phase = self.phase + num::<T>(core::f32::consts::TAU) * self.freq_hz * dt;
        self.elapsed = self.elapsed + dt;

        let filtered_command = self.command_filter.apply(command, dt);
        if self.angle_mode {
            ctrl.input_angle_step(axis, command);
            if ctrl.motor_limit_reached() {
                self.saturated = true;
                self.running = false;
                return Progress::Aborted;
            }
            let angle = self.response_filter.apply(ctrl.measured_angle(axis), dt);
            self.response
                .update_angle(filtered_command, angle, ctrl.measured_rate(axis), dt);
        } else {
            ctrl.input_rate_step(axis, command);
            let rate = self.response_filter.apply(ctrl.measured_rate(axis), dt);
            self.response.update(filtered_command, rate, dt);
        }

        if self.response.cycles_complete() {
            self.running = false;
            return Progress::Complete;
        }
        let timeout =
            num::<T>((DWELL_CYCLES + DWELL_TIMEOUT_EXTRA_CYCLES + 1) as f32) / self.freq_hz;
        if self.elapsed >= timeout {
            self.running = false;
            return Progress::Complete;
        }
        Progress::Running
    }

    /// True if motor saturation invalidated the dwell.
    pub fn saturated(&self) -> bool {
        self.saturated
    }

    /// Peak angular acceleration seen during an angle dwell, deg/s^2.
    pub fn max_accel(&self) -> T {
        self.response.max_accel()
    }

    /// Frequency response summary of the completed dwell.
    ///
    /// A saturated dwell or one whose estimates never stabilised reports
    /// a timeout instead of a response point.
    pub fn outcome(&self) -> TestOutcome<T> {
        if self.saturated {
            return TestOutcome::Saturated;
        }
        match self.response.result() {
            Some(result) => TestOutcome::Dwell(result),
            None => TestOutcome::TimedOut,
        }
    }
}

impl<T: Number> Default for DwellTest<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sustained constant-rate excitation for feedforward identification.
///
/// After a short settling phase the steady-state ratio of control output
/// to achieved rate is averaged; that ratio is the feedforward gain that
/// would reproduce the output open loop.
#[derive(Debug, Clone)]
pub struct FeedForwardTest<T> {
    target_rate: T,
    direction: T,
    phase: FfPhase,
    phase_elapsed: T,
    output_filter: LowPassFilter<T>,
    rate_filter: LowPassFilter<T>,
    measured: T,
    running: bool,
}

impl<T: Number> FeedForwardTest<T> {
    /// Creates an idle feedforward test.
    pub fn new() -> Self {
        FeedForwardTest {
            target_rate: T::zero(),
            direction: T::one(),
            phase: FfPhase::Settle,
            phase_elapsed: T::zero(),
            output_filter: LowPassFilter::new(num(FF_FILTER_HZ)),
            rate_filter: LowPassFilter::new(num(FF_FILTER_HZ)),
            measured: T::zero(),
            running: false,
        }
    }

    /// Starts a constant-rate test at `target_rate` deg/s.
    pub fn init(&mut self, target_rate: T, direction: T) {
        self.target_rate = target_rate;
        self.direction = direction;
        self.phase = FfPhase::Settle;
        self.phase_elapsed = T::zero();
        self.output_filter.clear();
        self.rate_filter.clear();
        self.measured = T::zero();
        self.running = true;
    }

    /// Drives the constant rate for one tick.
    pub fn run<C: AttitudeControl<T>>(&mut self, ctrl: &mut C, axis: Axis, dt: T) -> Progress {
        if !self.running {
            return Progress::Aborted;
        }
        ctrl.input_rate_step(axis, self.direction * self.target_rate);
        self.phase_elapsed = self.phase_elapsed + dt;

        match self.phase {
            FfPhase::Settle => {
                if self.phase_elapsed >= num(FF_SETTLE_S) {
                    self.phase = FfPhase::Measure;
                    self.phase_elapsed = T::zero();
                }
                Progress::Running
            }
            FfPhase::Measure => {
                let output = self.output_filter.apply(ctrl.control_output(axis).abs(), dt);
                let rate = self.rate_filter.apply(ctrl.measured_rate(axis).abs(), dt);
                if rate > T::epsilon() {
                    self.measured = output / rate;
                }
                if self.phase_elapsed >= num(FF_MEASURE_S) {
                    self.phase = FfPhase::Return;
                    self.phase_elapsed = T::zero();
                }
                Progress::Running
            }
            FfPhase::Return => {
                ctrl.input_rate_step(axis, T::zero());
                if ctrl.measured_rate(axis).abs() < self.target_rate * num(0.1) {
                    self.running = false;
                    return Progress::Complete;
                }
                Progress::Running
            }
        }
    }

    /// Measured feedforward estimate of the completed test.
    pub fn outcome(&self) -> TestOutcome<T> {
        TestOutcome::FeedForward {
            measured: self.measured,
        }
    }
}

impl<T: Number> Default for FeedForwardTest<T> {
    fn default() -> Self {
        Self::new()
    }
}
