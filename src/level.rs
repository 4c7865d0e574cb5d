// src/level.rs

//! # Level Supervisor Module
//!
//! Decides whether the vehicle is close enough to level, with low enough
//! body rates, to safely begin or continue a test.  Level must hold
//! continuously for a minimum duration before a test may start, and the
//! worst current violation is retained for operator reporting.

use crate::vehicle::{num, wrap_180, Axis, AttitudeControl, Number};

/// Maximum roll or pitch angle while levelling, degrees.
pub const LEVEL_ANGLE_RP_DEG: f32 = 5.0;
/// Maximum yaw heading error while levelling, degrees.
pub const LEVEL_ANGLE_YAW_DEG: f32 = 10.0;
/// Maximum roll or pitch rate while levelling, deg/s.
pub const LEVEL_RATE_RP_DPS: f32 = 10.0;
/// Maximum yaw rate while levelling, deg/s.
pub const LEVEL_RATE_YAW_DPS: f32 = 7.5;
/// Time level must hold continuously before a test may start, ms.
pub const LEVEL_REQUIRED_MS: u32 = 250;

/// Tags the worst current deviation from level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LevelIssue {
    /// No deviation recorded.
    None,
    /// Roll angle beyond threshold.
    AngleRoll,
    /// Pitch angle beyond threshold.
    AnglePitch,
    /// Yaw heading error beyond threshold.
    AngleYaw,
    /// Roll rate beyond threshold.
    RateRoll,
    /// Pitch rate beyond threshold.
    RatePitch,
    /// Yaw rate beyond threshold.
    RateYaw,
}

impl LevelIssue {
    /// Issue name for operator reporting.
    pub fn as_str(self) -> &'static str {
        match self {
            LevelIssue::None => "None",
            LevelIssue::AngleRoll => "Angle(R)",
            LevelIssue::AnglePitch => "Angle(P)",
            LevelIssue::AngleYaw => "Angle(Y)",
            LevelIssue::RateRoll => "Rate(R)",
            LevelIssue::RatePitch => "Rate(P)",
            LevelIssue::RateYaw => "Rate(Y)",
        }
    }
}

/// Worst currently observed deviation from level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelProblem<T> {
    /// Kind of deviation.
    pub issue: LevelIssue,
    /// Observed value, degrees or deg/s.
    pub current: T,
    /// Threshold that was exceeded.
    pub maximum: T,
}

/// Gates each test on the vehicle being level and quiet.
#[derive(Debug, Clone)]
pub struct LevelSupervisor<T> {
    problem: LevelProblem<T>,
    hold_start_ms: Option<u32>,
}

impl<T: Number> LevelSupervisor<T> {
    /// Creates a supervisor with no violation recorded.
    pub fn new() -> Self {
        LevelSupervisor {
            problem: LevelProblem {
                issue: LevelIssue::None,
                current: T::zero(),
                maximum: T::zero(),
            },
            hold_start_ms: None,
        }
    }

    /// Clears the hold timer and the recorded violation.
    pub fn reset(&mut self) {
        self.problem.issue = LevelIssue::None;
        self.problem.current = T::zero();
        self.problem.maximum = T::zero();
        self.hold_start_ms = None;
    }

    /// Checks one quantity against its maximum, recording the worst
    /// violation by relative excess. Returns true if within bounds.
    pub fn check_level(&mut self, issue: LevelIssue, current: T, maximum: T) -> bool {
        if current <= maximum {
            return true;
        }
        let worse = match self.problem.issue {
            LevelIssue::None => true,
            _ => {
                current * self.problem.maximum > self.problem.current * maximum
            }
        };
        if worse {
            self.problem = LevelProblem {
                issue,
                current,
                maximum,
            };
        }
        false
    }

    /// True once the vehicle has been within all level thresholds for
    /// the required continuous duration.
    pub fn currently_level<C: AttitudeControl<T>>(
        &mut self,
        ctrl: &C,
        desired_yaw: T,
        now_ms: u32,
    ) -> bool {
        // Evaluate every check so the worst violation is always current.
        let mut ok = self.check_level(
            LevelIssue::AngleRoll,
            ctrl.measured_angle(Axis::Roll).abs(),
            num(LEVEL_ANGLE_RP_DEG),
        );
        ok &= self.check_level(
            LevelIssue::AnglePitch,
            ctrl.measured_angle(Axis::Pitch).abs(),
            num(LEVEL_ANGLE_RP_DEG),
        );
        ok &= self.check_level(
            LevelIssue::AngleYaw,
            wrap_180(ctrl.measured_angle(Axis::Yaw) - desired_yaw).abs(),
            num(LEVEL_ANGLE_YAW_DEG),
        );
        ok &= self.check_level(
            LevelIssue::RateRoll,
            ctrl.measured_rate(Axis::Roll).abs(),
            num(LEVEL_RATE_RP_DPS),
        );
        ok &= self.check_level(
            LevelIssue::RatePitch,
            ctrl.measured_rate(Axis::Pitch).abs(),
            num(LEVEL_RATE_RP_DPS),
        );
        ok &= self.check_level(
            LevelIssue::RateYaw,
            ctrl.measured_rate(Axis::Yaw).abs(),
            num(LEVEL_RATE_YAW_DPS),
        );

        if !ok {
            self.hold_start_ms = None;
            return false;
        }
        let start = *self.hold_start_ms.get_or_insert(now_ms);
        now_ms.wrapping_sub(start) >= LEVEL_REQUIRED_MS
    }

    /// Worst currently recorded deviation.
    pub fn problem(&self) -> &LevelProblem<T> {
        &self.problem
    }

    /// Worst deviation name for operator reporting.
    pub fn issue_string(&self) -> &'static str {
        self.problem.issue.as_str()
    }
}

impl<T: Number> Default for LevelSupervisor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    /// A value within its maximum leaves no violation recorded.
    #[test]
    fn test_check_level_within_bounds() {
        let mut level = LevelSupervisor::new();
        assert!(level.check_level(LevelIssue::AngleRoll, 2.0, 5.0));
        assert_eq!(LevelIssue::None, level.problem().issue);
    }

    /// The record keeps the violation with the largest relative excess.
    #[test]
    fn test_check_level_keeps_worst_violation() {
        let mut level = LevelSupervisor::new();
        assert!(!level.check_level(LevelIssue::AngleRoll, 6.0, 5.0));
        assert!(!level.check_level(LevelIssue::RateYaw, 30.0, 7.5));
        assert!(!level.check_level(LevelIssue::AnglePitch, 7.0, 5.0));

        let problem = level.problem();
        assert_eq!(LevelIssue::RateYaw, problem.issue);
        assert!(value_close(30.0, problem.current));
        assert!(value_close(7.5, problem.maximum));
    }

    /// Level must hold for the required duration before passing.
    #[test]
    fn test_currently_level_requires_hold_time() {
        let mut level = LevelSupervisor::new();
        let ctrl = MockControl::new();

        assert!(!level.currently_level(&ctrl, 0.0, 1000));
        assert!(!level.currently_level(&ctrl, 0.0, 1000 + LEVEL_REQUIRED_MS - 1));
        assert!(level.currently_level(&ctrl, 0.0, 1000 + LEVEL_REQUIRED_MS));
    }

    /// Any transient violation restarts the hold timer.
    #[test]
    fn test_currently_level_restarts_on_violation() {
        let mut level = LevelSupervisor::new();
        let mut ctrl = MockControl::new();

        assert!(!level.currently_level(&ctrl, 0.0, 0));
        ctrl.angle[0] = 9.0;
        assert!(!level.currently_level(&ctrl, 0.0, 200));
        assert_eq!(LevelIssue::AngleRoll, level.problem().issue);

        ctrl.angle[0] = 0.0;
        assert!(!level.currently_level(&ctrl, 0.0, 260));
        assert!(!level.currently_level(&ctrl, 0.0, 260 + LEVEL_REQUIRED_MS - 10));
        assert!(level.currently_level(&ctrl, 0.0, 260 + LEVEL_REQUIRED_MS));
    }

    /// Yaw level is judged against the desired heading, wrapped.
    #[test]
    fn test_currently_level_yaw_error_wraps() {
        let mut level = LevelSupervisor::new();
        let mut ctrl = MockControl::new();
        ctrl.angle[2] = 179.0;

        // Desired heading on the far side of the wrap: only 2 deg away.
        assert!(!level.currently_level(&ctrl, -179.0, 0));
        assert!(level.currently_level(&ctrl, -179.0, LEVEL_REQUIRED_MS));
        assert_eq!(LevelIssue::None, level.problem().issue);
    }
}
