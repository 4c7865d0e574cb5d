// src/vehicle.rs

//! # Vehicle Interface Module
//!
//! This module specifies the contract between the tuning core and the
//! vehicle it runs on.  The core drives the live attitude controller
//! through [`AttitudeControl`] and reaches everything else that is
//! vehicle specific (pilot input, position estimate, logging, tuning
//! policy knobs) through [`VehicleAdapter`].  The core holds no vehicle
//! state of its own; both traits are passed in on every control tick.

use num_traits::{Float, FromPrimitive};
use piddiy::Number as PidNumber;

use crate::gains::AxisGains;
use crate::policy::{TuneType, DEFAULT_TUNE_SEQUENCE};

/// Custom trait to encapsulate base number requirements.
///
/// The estimator needs trigonometry on top of basic arithmetic, so this
/// builds on `num_traits::Float`.  `FromPrimitive` converts the crate's
/// fixed thresholds into the scalar type, and `piddiy::Number` lets the
/// same scalar drive the reference controller's PID loops.
pub trait Number: Float + FromPrimitive + PidNumber {}

impl<T: Float + FromPrimitive + PidNumber> Number for T {}

/// Converts an `f32` constant into the scalar type.
///
/// Conversion of the crate's compiled-in constants cannot fail for any
/// sensible float type; a zero fallback keeps the core panic free.
pub(crate) fn num<T: Number>(value: f32) -> T {
    T::from_f32(value).unwrap_or_else(T::zero)
}

/// Wraps an angle in degrees to the [-180, 180) range.
pub(crate) fn wrap_180<T: Number>(angle: T) -> T {
    let full = num::<T>(360.0);
    let half = num::<T>(180.0);
    let mut wrapped = angle % full;
    if wrapped >= half {
        wrapped = wrapped - full;
    }
    if wrapped < -half {
        wrapped = wrapped + full;
    }
    wrapped
}

/// Axis bitmask bit selecting roll for tuning.
pub const AXIS_BITMASK_ROLL: u8 = 1;
/// Axis bitmask bit selecting pitch for tuning.
pub const AXIS_BITMASK_PITCH: u8 = 2;
/// Axis bitmask bit selecting yaw for tuning.
pub const AXIS_BITMASK_YAW: u8 = 4;

/// Body axis that can be tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Axis {
    /// Rotation about the longitudinal axis.
    Roll,
    /// Rotation about the lateral axis.
    Pitch,
    /// Rotation about the vertical axis.
    Yaw,
}

impl Axis {
    /// All axes in tuning order.
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    /// Bit of this axis in the axis bitmask.
    pub fn bit(self) -> u8 {
        match self {
            Axis::Roll => AXIS_BITMASK_ROLL,
            Axis::Pitch => AXIS_BITMASK_PITCH,
            Axis::Yaw => AXIS_BITMASK_YAW,
        }
    }

    /// Array index of this axis.
    pub fn index(self) -> usize {
        match self {
            Axis::Roll => 0,
            Axis::Pitch => 1,
            Axis::Yaw => 2,
        }
    }

    /// Axis name for operator reporting.
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Roll => "Roll",
            Axis::Pitch => "Pitch",
            Axis::Yaw => "Yaw",
        }
    }
}

/// Log event identifiers reported through [`VehicleAdapter::write_event`].
///
/// The discriminants are the wire identifiers expected by the ground
/// station log analyser and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TuneEvent {
    /// Tuning session initialised and original gains captured.
    Initialised = 0,
    /// Tuning switched off, original gains restored.
    Off = 1,
    /// Tuning restarted after an earlier failure.
    Restart = 2,
    /// All selected axes completed successfully.
    Success = 3,
    /// Tuning failed; original gains restored.
    Failed = 4,
    /// A gain reached its allowed limit during tuning.
    ReachedLimit = 5,
    /// Pilot is flight testing the tuned gains.
    PilotTesting = 6,
    /// Tuned gains saved as the vehicle's permanent gains.
    SavedGains = 7,
}

/// High level status message identifiers for ground-station display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TuneMessage {
    /// Tuning has started.
    Started = 0,
    /// Tuning has stopped.
    Stopped = 1,
    /// Tuning succeeded on all selected axes.
    Success = 2,
    /// Tuning failed.
    Failed = 3,
    /// Tuned gains were saved.
    SavedGains = 4,
    /// A test is in progress.
    Testing = 5,
}

/// Excitation primitive used for a tuning step.
///
/// Multirotors identify most gains from step twitches; helicopter-class
/// vehicles replace several of those with frequency dwells.  The mapping
/// from [`TuneType`] to test kind is a vehicle-class policy supplied by
/// the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestKind {
    /// Bounded rate step with peak tracking.
    TwitchRate,
    /// Bounded angle step with peak tracking.
    TwitchAngle,
    /// Sinusoidal rate excitation at a fixed frequency.
    DwellRate,
    /// Sinusoidal angle excitation at a fixed frequency.
    DwellAngle,
    /// Sustained constant-rate excitation for feedforward identification.
    FeedForward,
}

/// Live attitude controller surface mutated by the tuning core.
///
/// The core is granted exclusive write access to the gain fields for the
/// duration of a tune session; the vehicle must guarantee no other
/// subsystem writes them concurrently while tuning is active.
pub trait AttitudeControl<T: Number> {
    /// Returns the current gains of one axis.
    fn axis_gains(&self, axis: Axis) -> AxisGains<T>;

    /// Replaces the gains of one axis.
    fn set_axis_gains(&mut self, axis: Axis, gains: &AxisGains<T>);

    /// Commands an attitude target in degrees and clears any excitation.
    fn input_angles(&mut self, roll: T, pitch: T, yaw: T);

    /// Commands a rate excitation in deg/s on one axis while the
    /// remaining axes hold their attitude targets.
    fn input_rate_step(&mut self, axis: Axis, rate: T);

    /// Commands an angle excitation in degrees on one axis while the
    /// remaining axes hold their attitude targets.
    fn input_angle_step(&mut self, axis: Axis, angle: T);

    /// Measured attitude angle in degrees.
    fn measured_angle(&self, axis: Axis) -> T;

    /// Measured body rate in deg/s.
    fn measured_rate(&self, axis: Axis) -> T;

    /// Most recent normalized control output for the axis.
    fn control_output(&self, axis: Axis) -> T;

    /// True if any motor output saturated on the last update.
    fn motor_limit_reached(&self) -> bool;
}

/// Vehicle-specific collaborator queried and driven by the tuning core.
///
/// Defaults are provided wherever a safe generic answer exists so that
/// simple vehicles only implement pilot input and initialisation.
pub trait VehicleAdapter<T: Number> {
    /// Vehicle pre-conditions for starting a tune. Returning false
    /// refuses the start request.
    fn init(&mut self) -> bool;

    /// Initialises position controller vertical limits for the tune.
    fn init_z_limits(&mut self) {}

    /// Pilot desired climb rate in cm/s, passed through while tuning.
    fn pilot_desired_climb_rate(&self) -> T {
        T::zero()
    }

    /// Commands the vertical controller with the climb rate the core
    /// passes through each tick; the pilot keeps vertical authority.
    fn request_climb_rate(&mut self, _climb_rate: T) {}

    /// Pilot desired roll and pitch angles in degrees and yaw rate in
    /// deg/s. Nonzero input suspends the active test.
    fn pilot_desired_rp_yrate(&self) -> (T, T, T);

    /// True if a good position estimate exists.
    fn position_ok(&self) -> bool {
        false
    }

    /// Roll and pitch attitude in degrees for slow position hold while
    /// waiting for level.
    fn poshold_attitude(&self) -> (T, T) {
        (T::zero(), T::zero())
    }

    /// Logs PIDs at full rate during a test.
    fn log_pids(&mut self) {}

    /// Writes a tuning log event.
    fn write_event(&mut self, _event: TuneEvent) {}

    /// Writes a per-test summary log record.
    fn log_autotune(&mut self) {}

    /// Writes a per-tick detail log record during a test.
    fn log_autotune_details(&mut self) {}

    /// Sends a high level status message to the ground station.
    fn gcs_announce(&mut self, _message: TuneMessage) {}

    /// Reports a levelling attempt that timed out, with the worst
    /// deviation seen while waiting.
    fn level_failed(&mut self, _issue: &'static str) {}

    /// Periodic free-form progress announcement hook.
    fn do_gcs_announcements(&mut self) {}

    /// Ordered tuning stages for this vehicle class, at most six entries.
    fn tune_sequence(&self) -> &[TuneType] {
        &DEFAULT_TUNE_SEQUENCE
    }

    /// Excitation primitive to use for a tuning stage.
    fn test_kind(&self, tune_type: TuneType) -> TestKind {
        match tune_type {
            TuneType::RateDUp
            | TuneType::RateDDown
            | TuneType::RatePUp
            | TuneType::RatePDown => TestKind::TwitchRate,
            TuneType::AnglePUp | TuneType::AnglePDown => TestKind::TwitchAngle,
            TuneType::RateFfUp | TuneType::RateFfDown => TestKind::FeedForward,
            TuneType::MaxGains => TestKind::DwellRate,
            TuneType::Complete => TestKind::TwitchRate,
        }
    }

    /// Rate I gain used between tests, derived from the original value.
    fn intra_test_rate_i(&self, _axis: Axis, original: T) -> T {
        original * num(0.25)
    }

    /// Final rate I gain for a tuned axis, derived from the tuned rate P.
    fn tuned_rate_i(&self, _axis: Axis, tuned_rate_p: T) -> T {
        tuned_rate_p
    }

    /// Final yaw rate D gain for a tuned yaw axis.
    fn tuned_yaw_rate_d(&self) -> T {
        T::zero()
    }

    /// Minimum rate P gain for any axis.
    fn rate_p_min(&self) -> T {
        num(0.01)
    }

    /// Minimum angle P gain for any axis.
    fn angle_p_min(&self) -> T {
        num(0.5)
    }

    /// Minimum yaw rate filter cutoff in Hz.
    fn yaw_rate_filt_min(&self) -> T {
        num(1.0)
    }

    /// True if a rate P gain of zero is acceptable for this vehicle.
    fn allow_zero_rate_p(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_bits_match_bitmask_constants() {
        assert_eq!(AXIS_BITMASK_ROLL, Axis::Roll.bit());
        assert_eq!(AXIS_BITMASK_PITCH, Axis::Pitch.bit());
        assert_eq!(AXIS_BITMASK_YAW, Axis::Yaw.bit());
    }

    #[test]
    fn test_event_and_message_identifiers() {
        assert_eq!(0, TuneEvent::Initialised as u8);
        assert_eq!(5, TuneEvent::ReachedLimit as u8);
        assert_eq!(7, TuneEvent::SavedGains as u8);
        assert_eq!(0, TuneMessage::Started as u8);
        assert_eq!(5, TuneMessage::Testing as u8);
    }

    #[test]
    fn test_wrap_180_keeps_half_open_range() {
        assert_eq!(-180.0, wrap_180(180.0f32));
        assert_eq!(-170.0, wrap_180(190.0f32));
        assert_eq!(170.0, wrap_180(-190.0f32));
        assert_eq!(10.0, wrap_180(370.0f32));
    }
}
