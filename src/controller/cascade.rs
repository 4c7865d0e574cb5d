// src/controller/cascade.rs

//! # Cascaded Attitude Controller
//!
//! Per axis, an angle P outer loop produces a rate target that is slew
//! limited, low-pass filtered and tracked by a rate PID inner loop with
//! feedforward.  Excitation steps from the tuner are injected between
//! the loops: a rate step adds to the rate target, an angle step adds
//! to the attitude target.

use piddiy::PidController;

use crate::filter::LowPassFilter;
use crate::gains::AxisGains;
use crate::vehicle::{wrap_180, AttitudeControl, Axis, Number};

/// Control data for the rate loop PID callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLoopData<T> {
    /// Measured body rate, deg/s.
    pub rate: T,
    /// The time delta since the last computation.
    pub dt: T,
    /// The maximum allowed value for the integral term, used to prevent
    /// integral windup.
    pub integral_limit: T,
    /// Flag to reset the integral term, typically used when the
    /// controller is inactive.
    pub reset_integral: bool,
}

/// Rate loop PID compute callback.
pub fn compute_rate_loop<T: Number>(
    pid: &mut PidController<T, RateLoopData<T>>,
    data: RateLoopData<T>,
) -> (T, T, T) {
    let error = pid.set_point - data.rate;
    let integral = if !data.reset_integral {
        (pid.integral + error * data.dt)
            .max(-data.integral_limit)
            .min(data.integral_limit)
    } else {
        T::zero()
    };
    let derivative = if data.dt > T::zero() {
        (error - pid.error) / data.dt
    } else {
        T::zero()
    };

    (error, integral, derivative)
}

struct CascadeAxis<T: Number> {
    gains: AxisGains<T>,
    pid: PidController<T, RateLoopData<T>>,
    target_filter: LowPassFilter<T>,
    rate_target: T,
}

impl<T: Number> CascadeAxis<T> {
    fn new() -> Self {
        let mut pid = PidController::new();
        pid.compute_fn(compute_rate_loop)
            .set_point(T::zero())
            .kp(T::zero())
            .ki(T::zero())
            .kd(T::zero());
        CascadeAxis {
            gains: AxisGains::zeroed(),
            pid,
            target_filter: LowPassFilter::new(T::zero()),
            rate_target: T::zero(),
        }
    }

    fn set_gains(&mut self, gains: &AxisGains<T>) {
        self.gains = *gains;
        self.pid.kp(gains.rate_p).ki(gains.rate_i).kd(gains.rate_d);
        self.target_filter.set_cutoff(gains.rate_filt);
    }
}

/// Cascaded angle and rate attitude controller for all three axes.
///
/// Feed measurements in with [`CascadeAttitudeControl::update`] once
/// per tick; the returned outputs are normalized to [-1, 1].
pub struct CascadeAttitudeControl<T: Number> {
    axes: [CascadeAxis<T>; 3],
    angle_target: [T; 3],
    rate_step: [T; 3],
    angle_step: [T; 3],
    measured_angle: [T; 3],
    measured_rate: [T; 3],
    output: [T; 3],
    integral_limit: T,
    motor_limit: bool,
}

impl<T: Number> CascadeAttitudeControl<T> {
    /// Default limit for the rate loop integral term.
    pub const DEFAULT_I_LIMIT: f32 = 25.0;

    /// Creates a controller with zero gains and a default integral
    /// limit. Set gains per axis before use.
    pub fn new() -> Self {
        CascadeAttitudeControl {
            axes: [CascadeAxis::new(), CascadeAxis::new(), CascadeAxis::new()],
            angle_target: [T::zero(); 3],
            rate_step: [T::zero(); 3],
            angle_step: [T::zero(); 3],
            measured_angle: [T::zero(); 3],
            measured_rate: [T::zero(); 3],
            output: [T::zero(); 3],
            integral_limit: crate::vehicle::num(Self::DEFAULT_I_LIMIT),
            motor_limit: false,
        }
    }

    /// Changes the rate loop integral limit.
    pub fn set_integral_limit(&mut self, limit: T) {
        self.integral_limit = limit;
    }

    /// Zeroes the rate loop integrators.
    pub fn reset_integrators(&mut self) {
        for axis in self.axes.iter_mut() {
            axis.pid.integral = T::zero();
        }
    }

    /// Runs one control tick from the measured attitude in degrees and
    /// body rates in deg/s, returning the roll, pitch and yaw outputs.
    pub fn update(&mut self, attitude: (T, T, T), gyro: (T, T, T), dt: T) -> (T, T, T) {
        self.measured_angle = [attitude.0, attitude.1, attitude.2];
        self.measured_rate = [gyro.0, gyro.1, gyro.2];
        self.motor_limit = false;

        for axis in Axis::ALL {
            let i = axis.index();
            let raw_error =
                self.angle_target[i] + self.angle_step[i] - self.measured_angle[i];
            let error = if axis == Axis::Yaw {
                wrap_180(raw_error)
            } else {
                raw_error
            };

            let state = &mut self.axes[i];
            let mut rate_target = state.gains.angle_p * error + self.rate_step[i];
            if state.gains.accel_max > T::zero() && dt > T::zero() {
                let max_delta = state.gains.accel_max * dt;
                rate_target = rate_target
                    .max(state.rate_target - max_delta)
                    .min(state.rate_target + max_delta);
            }
            state.rate_target = rate_target;
            let filtered = state.target_filter.apply(rate_target, dt);

            state.pid.set_point(filtered);
            let data = RateLoopData {
                rate: self.measured_rate[i],
                dt,
                integral_limit: self.integral_limit,
                reset_integral: false,
            };
            let mut out = state.pid.compute(data) + state.gains.rate_ff * filtered;
            if out > T::one() {
                out = T::one();
                self.motor_limit = true;
            } else if out < -T::one() {
                out = -T::one();
                self.motor_limit = true;
            }
            self.output[i] = out;
        }
        (self.output[0], self.output[1], self.output[2])
    }
}

impl<T: Number> Default for CascadeAttitudeControl<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Number> AttitudeControl<T> for CascadeAttitudeControl<T> {
    fn axis_gains(&self, axis: Axis) -> AxisGains<T> {
        self.axes[axis.index()].gains
    }

    fn set_axis_gains(&mut self, axis: Axis, gains: &AxisGains<T>) {
        self.axes[axis.index()].set_gains(gains);
    }

    fn input_angles(&mut self, roll: T, pitch: T, yaw: T) {
        self.angle_target = [roll, pitch, yaw];
        self.rate_step = [T::zero(); 3];
        self.angle_step = [T::zero(); 3];
    }

    fn input_rate_step(&mut self, axis: Axis, rate: T) {
        self.rate_step[axis.index()] = rate;
    }

    fn input_angle_step(&mut self, axis: Axis, angle: T) {
        self.angle_step[axis.index()] = angle;
    }

    fn measured_angle(&self, axis: Axis) -> T {
        self.measured_angle[axis.index()]
    }

    fn measured_rate(&self, axis: Axis) -> T {
        self.measured_rate[axis.index()]
    }

    fn control_output(&self, axis: Axis) -> T {
        self.output[axis.index()]
    }

    fn motor_limit_reached(&self) -> bool {
        self.motor_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    const DT: f32 = 0.0025;
    /// Angular acceleration per unit output in the simulated body,
    /// deg/s^2.
    const PLANT_ACCEL: f32 = 500.0;
    /// Rotational drag coefficient of the simulated body.
    const PLANT_DRAG: f32 = 2.0;

    fn sim_gains() -> AxisGains<f32> {
        AxisGains {
            rate_p: 0.05,
            rate_i: 0.05,
            rate_d: 0.0002,
            rate_ff: 0.0,
            rate_filt: 20.0,
            angle_p: 3.0,
            accel_max: 0.0,
        }
    }

    fn controller() -> CascadeAttitudeControl<f32> {
        let mut ctrl = CascadeAttitudeControl::new();
        for axis in Axis::ALL {
            ctrl.set_axis_gains(axis, &sim_gains());
        }
        ctrl
    }

    /// Steps a one-axis rigid body closed around the controller.
    fn sim_step(ctrl: &mut CascadeAttitudeControl<f32>, angle: &mut f32, rate: &mut f32) {
        let (out, _, _) = ctrl.update((*angle, 0.0, 0.0), (*rate, 0.0, 0.0), DT);
        let accel = out * PLANT_ACCEL - PLANT_DRAG * *rate;
        *rate += accel * DT;
        *angle += *rate * DT;
    }

    /// Gains written to an axis read back unchanged.
    #[test]
    fn test_gain_round_trip() {
        let mut ctrl = CascadeAttitudeControl::new();
        let gains = sim_gains();
        ctrl.set_axis_gains(Axis::Pitch, &gains);
        assert_eq!(gains, ctrl.axis_gains(Axis::Pitch));
    }

    /// No error and no motion produce no output.
    #[test]
    fn test_no_error_zero_output() {
        let mut ctrl = controller();
        ctrl.input_angles(0.0, 0.0, 0.0);
        let (roll, pitch, yaw) = ctrl.update((0.0, 0.0, 0.0), (0.0, 0.0, 0.0), DT);
        assert!(value_close(0.0, roll));
        assert!(value_close(0.0, pitch));
        assert!(value_close(0.0, yaw));
    }

    /// A commanded attitude is reached by the closed loop.
    #[test]
    fn test_angle_command_converges() {
        let mut ctrl = controller();
        ctrl.input_angles(10.0, 0.0, 0.0);

        let mut angle = 0.0;
        let mut rate = 0.0;
        for _ in 0..8000 {
            sim_step(&mut ctrl, &mut angle, &mut rate);
        }
        assert!(
            (angle - 10.0).abs() < 0.5,
            "Attitude {} should settle near the 10 degree command.",
            angle
        );
        assert!(rate.abs() < 2.0, "Residual rate {} should be small.", rate);
    }

    /// A rate excitation is tracked by the rate loop.
    #[test]
    fn test_rate_step_tracks_target() {
        let mut ctrl = controller();
        // Disable the outer loop so the rate target is the step alone.
        let mut gains = sim_gains();
        gains.angle_p = 0.0;
        ctrl.set_axis_gains(Axis::Roll, &gains);
        ctrl.input_angles(0.0, 0.0, 0.0);
        ctrl.input_rate_step(Axis::Roll, 50.0);

        let mut angle = 0.0;
        let mut rate = 0.0;
        for _ in 0..8000 {
            sim_step(&mut ctrl, &mut angle, &mut rate);
        }
        assert!(
            (rate - 50.0).abs() < 2.0,
            "Rate {} should track the 50 deg/s excitation.",
            rate
        );
    }

    /// The rate target slew limit bounds the achieved acceleration.
    #[test]
    fn test_accel_limit_slews_rate_target() {
        let mut ctrl = controller();
        let mut gains = sim_gains();
        gains.angle_p = 0.0;
        gains.rate_i = 0.0;
        gains.rate_d = 0.0;
        gains.accel_max = 100.0;
        ctrl.set_axis_gains(Axis::Roll, &gains);
        ctrl.input_rate_step(Axis::Roll, 50.0);

        // After one tick the internal target may have moved by at most
        // accel_max * dt, so the P output reflects the slewed target.
        let _ = ctrl.update((0.0, 0.0, 0.0), (0.0, 0.0, 0.0), DT);
        let out_limited = ctrl.control_output(Axis::Roll);
        assert!(
            value_close(gains.rate_p * 100.0 * DT, out_limited),
            "Output {} should reflect the slewed target only.",
            out_limited
        );
    }

    /// Saturated output is clamped and flagged.
    #[test]
    fn test_output_clamped_and_flagged() {
        let mut ctrl = controller();
        ctrl.input_rate_step(Axis::Roll, 10_000.0);
        let (roll, _, _) = ctrl.update((0.0, 0.0, 0.0), (0.0, 0.0, 0.0), DT);
        assert!(value_close(1.0, roll));
        assert!(ctrl.motor_limit_reached());
    }

    /// A new attitude command clears any pending excitation.
    #[test]
    fn test_input_angles_clears_excitation() {
        let mut ctrl = controller();
        ctrl.input_rate_step(Axis::Roll, 50.0);
        ctrl.input_angle_step(Axis::Pitch, 20.0);
        ctrl.input_angles(0.0, 0.0, 0.0);

        let (roll, pitch, _) = ctrl.update((0.0, 0.0, 0.0), (0.0, 0.0, 0.0), DT);
        assert!(value_close(0.0, roll));
        assert!(value_close(0.0, pitch));
    }

    /// Yaw attitude error wraps across the 180 degree boundary.
    #[test]
    fn test_yaw_error_wraps() {
        let mut ctrl = controller();
        ctrl.input_angles(0.0, 0.0, -179.0);
        let (_, _, yaw) = ctrl.update((0.0, 0.0, 179.0), (0.0, 0.0, 0.0), DT);
        // The short way round is +2 degrees, so the output is positive.
        assert!(yaw > 0.0, "Yaw output {} should take the short way.", yaw);
    }

    /// Feedforward contributes output proportional to the rate target.
    #[test]
    fn test_feedforward_term() {
        let mut ctrl = CascadeAttitudeControl::new();
        let mut gains = AxisGains::zeroed();
        gains.rate_ff = 0.01;
        gains.rate_filt = 0.0;
        ctrl.set_axis_gains(Axis::Roll, &gains);
        ctrl.input_rate_step(Axis::Roll, 50.0);

        let (roll, _, _) = ctrl.update((0.0, 0.0, 0.0), (50.0, 0.0, 0.0), DT);
        assert!(value_close(0.5, roll), "Output should be ff * rate target.");
    }
}
