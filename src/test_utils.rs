// src/test_utils.rs

//! This module contains utilities for testing.

use std::vec::Vec;

use crate::gains::AxisGains;
use crate::policy::{TuneType, DEFAULT_TUNE_SEQUENCE};
use crate::vehicle::{AttitudeControl, Axis, TuneEvent, TuneMessage, VehicleAdapter};

/// A constant defining the tolerance within which floating-point values
/// are considered close enough to be equal.
pub const TEST_TOLERANCE: f32 = 1e-5;

/// Checks if two floating point numbers are close enough to be considered
/// equal.
///
/// # Arguments
/// * `target` - The target value.
/// * `value` - The value to compare against the target.
///
/// # Returns
/// `true` if the absolute difference between `target` and `value` is less than
/// `TEST_TOLERANCE`, otherwise `false`.
pub fn value_close(target: f32, value: f32) -> bool {
    (target - value).abs() < TEST_TOLERANCE
}

/// A plain gain set for seeding mock controllers.
pub fn test_gains(rate_p: f32, rate_i: f32) -> AxisGains<f32> {
    AxisGains {
        rate_p,
        rate_i,
        rate_d: 0.004,
        rate_ff: 0.0,
        rate_filt: 2.0,
        angle_p: 4.5,
        accel_max: 0.0,
    }
}

/// Scriptable attitude controller for unit tests.
///
/// Measurements are plain public arrays a test writes directly. In
/// tracking mode the mock behaves like an ideal vehicle: commanded
/// steps and attitude targets are reflected in the measurements on the
/// same tick, which drives the state machine deterministically.
pub struct MockControl {
    /// Per axis gain sets.
    pub gains: [AxisGains<f32>; 3],
    /// Measured attitude, degrees.
    pub angle: [f32; 3],
    /// Measured body rate, deg/s.
    pub rate: [f32; 3],
    /// Normalized control outputs.
    pub output: [f32; 3],
    /// Most recent rate excitation per axis.
    pub last_rate_step: [f32; 3],
    /// Most recent angle excitation per axis.
    pub last_angle_step: [f32; 3],
    /// Reported motor saturation.
    pub motor_limit: bool,
    /// Axis and rate held even through attitude commands, for tests
    /// that need a vehicle that never settles.
    pub hold_rate: Option<(Axis, f32)>,
    /// Fraction of a commanded rate step the tracking mock achieves,
    /// for tests that need an underpowered vehicle.
    pub response_scale: f32,
    base_angle: [f32; 3],
    track: bool,
}

impl MockControl {
    /// Creates an inert mock; measurements only change when the test
    /// writes them.
    pub fn new() -> Self {
        MockControl {
            gains: [AxisGains::zeroed(); 3],
            angle: [0.0; 3],
            rate: [0.0; 3],
            output: [0.0; 3],
            last_rate_step: [0.0; 3],
            last_angle_step: [0.0; 3],
            motor_limit: false,
            hold_rate: None,
            response_scale: 1.0,
            base_angle: [0.0; 3],
            track: false,
        }
    }

    /// Creates a mock that tracks every command instantly.
    pub fn tracking() -> Self {
        let mut ctrl = Self::new();
        ctrl.track = true;
        ctrl
    }
}

impl AttitudeControl<f32> for MockControl {
    fn axis_gains(&self, axis: Axis) -> AxisGains<f32> {
        self.gains[axis.index()]
    }

    fn set_axis_gains(&mut self, axis: Axis, gains: &AxisGains<f32>) {
        self.gains[axis.index()] = *gains;
    }

    fn input_angles(&mut self, roll: f32, pitch: f32, yaw: f32) {
        if self.track {
            self.angle = [roll, pitch, yaw];
            self.base_angle = self.angle;
            self.rate = [0.0; 3];
            if let Some((axis, rate)) = self.hold_rate {
                self.rate[axis.index()] = rate;
            }
        }
    }

    fn input_rate_step(&mut self, axis: Axis, rate: f32) {
        self.last_rate_step[axis.index()] = rate;
        if self.track {
            self.rate[axis.index()] = rate * self.response_scale;
        }
    }

    fn input_angle_step(&mut self, axis: Axis, angle: f32) {
        self.last_angle_step[axis.index()] = angle;
        if self.track {
            self.angle[axis.index()] = self.base_angle[axis.index()] + angle;
        }
    }

    fn measured_angle(&self, axis: Axis) -> f32 {
        self.angle[axis.index()]
    }

    fn measured_rate(&self, axis: Axis) -> f32 {
        self.rate[axis.index()]
    }

    fn control_output(&self, axis: Axis) -> f32 {
        self.output[axis.index()]
    }

    fn motor_limit_reached(&self) -> bool {
        self.motor_limit
    }
}

/// Scriptable vehicle adapter that records everything reported to it.
pub struct MockAdapter {
    /// Answer given to the init request.
    pub init_ok: bool,
    /// Scripted pilot input: roll, pitch, yaw rate.
    pub pilot_rp_yrate: (f32, f32, f32),
    /// Scripted pilot climb rate, cm/s.
    pub pilot_climb_rate: f32,
    /// Tuning stages overriding the default sequence.
    pub tune_seq: Option<&'static [TuneType]>,
    /// Every event written, in order.
    pub events: Vec<TuneEvent>,
    /// Every ground station message sent, in order.
    pub messages: Vec<TuneMessage>,
    /// Worst deviation of every levelling attempt that timed out.
    pub level_failures: Vec<&'static str>,
    /// Last climb rate passed through to the vertical controller.
    pub last_climb_command: Option<f32>,
}

impl MockAdapter {
    /// Creates an adapter with centred sticks that accepts the start.
    pub fn new() -> Self {
        MockAdapter {
            init_ok: true,
            pilot_rp_yrate: (0.0, 0.0, 0.0),
            pilot_climb_rate: 0.0,
            tune_seq: None,
            events: Vec::new(),
            messages: Vec::new(),
            level_failures: Vec::new(),
            last_climb_command: None,
        }
    }
}

impl VehicleAdapter<f32> for MockAdapter {
    fn init(&mut self) -> bool {
        self.init_ok
    }

    fn pilot_desired_rp_yrate(&self) -> (f32, f32, f32) {
        self.pilot_rp_yrate
    }

    fn pilot_desired_climb_rate(&self) -> f32 {
        self.pilot_climb_rate
    }

    fn request_climb_rate(&mut self, climb_rate: f32) {
        self.last_climb_command = Some(climb_rate);
    }

    fn tune_sequence(&self) -> &[TuneType] {
        self.tune_seq.unwrap_or(&DEFAULT_TUNE_SEQUENCE)
    }

    fn write_event(&mut self, event: TuneEvent) {
        self.events.push(event);
    }

    fn gcs_announce(&mut self, message: TuneMessage) {
        self.messages.push(message);
    }

    fn level_failed(&mut self, issue: &'static str) {
        self.level_failures.push(issue);
    }
}
