// src/tune.rs

//! # Tuning State Machine Module
//!
//! The tick-driven core of the tuner.  Each control tick advances a
//! three-step cycle per test: wait for the vehicle to hold level, run
//! one excitation test, then apply the gain update policy to the
//! result.  The pilot keeps authority throughout; any stick deflection
//! suspends the active test, restores the original gains and hands the
//! vehicle back until the sticks have been centred for a short
//! cooldown.

use crate::excitation::{DwellTest, FeedForwardTest, Progress, TwitchTest};
use crate::gains::{GainStore, GainType};
use crate::level::LevelSupervisor;
use crate::policy::{GainUpdatePolicy, TestOutcome, TuneType, Verdict};
use crate::vehicle::{
    num, Axis, AttitudeControl, Number, TestKind, TuneEvent, TuneMessage, VehicleAdapter,
    AXIS_BITMASK_PITCH, AXIS_BITMASK_ROLL, AXIS_BITMASK_YAW,
};

/// Interval between periodic progress announcements, ms.
pub const ANNOUNCE_INTERVAL_MS: u32 = 2000;
/// Time allowed for the vehicle to reach level before one attempt fails, ms.
pub const LEVEL_TIMEOUT_MS: u32 = 2000;
/// Failed levelling attempts tolerated before the tune fails.
pub const LEVEL_FAIL_LIMIT: u8 = 4;
/// Time the sticks must stay centred after a pilot override, ms.
pub const OVERRIDE_COOLDOWN_MS: u32 = 500;

/// Stick deflection treated as a pilot override, degrees or deg/s.
const OVERRIDE_STICK_THRESHOLD: f32 = 2.5;
/// Roll and pitch rate twitch target, deg/s.
const TWITCH_RATE_RP_DPS: f32 = 75.0;
/// Yaw rate twitch target, deg/s.
const TWITCH_RATE_YAW_DPS: f32 = 45.0;
/// Roll and pitch angle twitch target, degrees.
const TWITCH_ANGLE_RP_DEG: f32 = 20.0;
/// Yaw angle twitch target, degrees.
const TWITCH_ANGLE_YAW_DEG: f32 = 10.0;
/// Time budget of a single twitch, ms.
const TWITCH_TIME_LIMIT_MS: u32 = 1000;
/// Rate dwell amplitude, deg/s.
const DWELL_RATE_AMPLITUDE_DPS: f32 = 30.0;
/// Angle dwell amplitude, degrees.
const DWELL_ANGLE_AMPLITUDE_DEG: f32 = 5.0;
/// Dwell frequency for stages outside the maximum-gain sweep, Hz.
const DWELL_DEFAULT_HZ: f32 = 2.0;
/// Feedforward test rate target, deg/s.
const FF_TARGET_RATE_DPS: f32 = 30.0;

/// Lifecycle of a tuning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TuneMode {
    /// No session active; the tuner has never touched the controller.
    Uninitialised,
    /// A session is running tests.
    Tuning,
    /// All selected axes completed; tuned gains are loaded.
    Success,
    /// The session gave up; original gains are loaded.
    Failed,
}

/// Step of the per-test cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepType {
    /// Holding attitude until the vehicle is level and quiet.
    WaitingForLevel,
    /// An excitation test is running.
    Testing,
    /// A completed test is being fed to the gain update policy.
    UpdateGains,
}

/// Operator-set tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoTuneConfig<T> {
    /// Bitmask of axes to tune, roll 1, pitch 2, yaw 4.
    pub axis_bitmask: u8,
    /// Overshoot fraction accepted as well tuned.
    pub aggressiveness: T,
    /// Smallest rate D gain the tuner may settle on.
    pub min_d: T,
    /// Hold position slowly while waiting for level.
    pub use_poshold: bool,
}

impl<T: Number> AutoTuneConfig<T> {
    /// Default configuration: all axes, moderate aggressiveness.
    pub fn new() -> Self {
        AutoTuneConfig {
            axis_bitmask: AXIS_BITMASK_ROLL | AXIS_BITMASK_PITCH | AXIS_BITMASK_YAW,
            aggressiveness: num(0.1),
            min_d: num(0.001),
            use_poshold: false,
        }
    }
}

impl<T: Number> Default for AutoTuneConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Attitude-control autotuner.
///
/// Owns no vehicle state; the live controller and the vehicle adapter
/// are passed into every call.  Call [`AutoTune::update`] once per
/// control tick while the tuning flight mode is active.
#[derive(Debug)]
pub struct AutoTune<T> {
    config: AutoTuneConfig<T>,
    mode: TuneMode,
    step: StepType,
    gains: GainStore<T>,
    level: LevelSupervisor<T>,
    policy: GainUpdatePolicy<T>,
    twitch: TwitchTest<T>,
    dwell: DwellTest<T>,
    feedforward: FeedForwardTest<T>,
    axis: Axis,
    axes_completed: u8,
    tune_seq_index: usize,
    current_test: TestKind,
    positive_direction: bool,
    desired_yaw: T,
    step_start_ms: u32,
    level_fail_count: u8,
    override_active: bool,
    override_expires_ms: u32,
    last_announce_ms: u32,
    last_testing_announce_ms: u32,
    pending_outcome: Option<TestOutcome<T>>,
    pilot_testing_reported: bool,
}

impl<T: Number> AutoTune<T> {
    /// Creates an idle tuner with the given configuration.
    pub fn new(config: AutoTuneConfig<T>) -> Self {
        AutoTune {
            policy: GainUpdatePolicy::new(config.aggressiveness, config.min_d),
            config,
            mode: TuneMode::Uninitialised,
            step: StepType::WaitingForLevel,
            gains: GainStore::new(),
            level: LevelSupervisor::new(),
            twitch: TwitchTest::new(),
            dwell: DwellTest::new(),
            feedforward: FeedForwardTest::new(),
            axis: Axis::Roll,
            axes_completed: 0,
            tune_seq_index: 0,
            current_test: TestKind::TwitchRate,
            positive_direction: true,
            desired_yaw: T::zero(),
            step_start_ms: 0,
            level_fail_count: 0,
            override_active: false,
            override_expires_ms: 0,
            last_announce_ms: 0,
            last_testing_announce_ms: 0,
            pending_outcome: None,
            pilot_testing_reported: false,
        }
    }

    /// Lifecycle state of the session.
    pub fn mode(&self) -> TuneMode {
        self.mode
    }

    /// Step of the per-test cycle.
    pub fn step(&self) -> StepType {
        self.step
    }

    /// Axis currently under tune.
    pub fn current_axis(&self) -> Axis {
        self.axis
    }

    /// Bitmask of axes that finished tuning.
    pub fn axes_completed(&self) -> u8 {
        self.axes_completed
    }

    /// The session's gain sets.
    pub fn gain_store(&self) -> &GainStore<T> {
        &self.gains
    }

    /// Worst level deviation name for operator reporting.
    pub fn level_issue(&self) -> &'static str {
        self.level.issue_string()
    }

    /// Starts or resumes a tuning session.
    ///
    /// The original gains are captured on the first start of a session
    /// and kept across restarts. Returns false if the vehicle refuses.
    pub fn start<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32) -> bool
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        if !adapter.init() {
            return false;
        }
        adapter.init_z_limits();

        let restart = matches!(self.mode, TuneMode::Success | TuneMode::Failed);
        if self.gains.backup_and_initialise(ctrl) {
            adapter.write_event(TuneEvent::Initialised);
        } else if restart {
            adapter.write_event(TuneEvent::Restart);
        }

        self.axes_completed = 0;
        self.tune_seq_index = 0;
        self.level_fail_count = 0;
        self.positive_direction = true;
        self.override_active = false;
        self.pending_outcome = None;
        self.pilot_testing_reported = false;
        self.twitch.reset_scaler();
        self.policy = GainUpdatePolicy::new(self.config.aggressiveness, self.config.min_d);

        let axis = match self.next_axis() {
            Some(axis) => axis,
            None => return false,
        };
        self.axis = axis;
        self.policy.reset_for_stage(self.current_tune_type(adapter));
        self.desired_yaw = ctrl.measured_angle(Axis::Yaw);
        self.mode = TuneMode::Tuning;
        self.last_announce_ms = now_ms;
        self.last_testing_announce_ms = now_ms.wrapping_sub(ANNOUNCE_INTERVAL_MS);
        self.enter_waiting_for_level(ctrl, adapter, now_ms, GainType::IntraTest);
        adapter.gcs_announce(TuneMessage::Started);
        true
    }

    /// Leaves the tuning flight mode, restoring the original gains.
    ///
    /// A finished session keeps its Success or Failed mode so a later
    /// start can resume or save; an interrupted session goes back to
    /// idle.
    pub fn stop<C, A>(&mut self, ctrl: &mut C, adapter: &mut A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        if self.gains.backed_up() {
            self.gains.load_gains(GainType::Original, ctrl, adapter);
        }
        adapter.write_event(TuneEvent::Off);
        adapter.gcs_announce(TuneMessage::Stopped);
        if self.mode == TuneMode::Tuning {
            self.mode = TuneMode::Uninitialised;
        }
    }

    /// Forgets the whole session, including the gain backup.
    pub fn reset(&mut self) {
        self.mode = TuneMode::Uninitialised;
        self.step = StepType::WaitingForLevel;
        self.axes_completed = 0;
        self.tune_seq_index = 0;
        self.level_fail_count = 0;
        self.pending_outcome = None;
        self.gains.clear_backup();
        self.level.reset();
    }

    /// Makes the tuned gains the vehicle's permanent gains.
    ///
    /// Only a successful session may be saved; the call is ignored
    /// otherwise.
    pub fn save_tuning_gains<C, A>(&mut self, ctrl: &mut C, adapter: &mut A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        if self.mode != TuneMode::Success || !self.gains.backed_up() {
            return;
        }
        self.gains.load_gains(GainType::Tuned, ctrl, adapter);
        adapter.write_event(TuneEvent::SavedGains);
        adapter.gcs_announce(TuneMessage::SavedGains);
        self.gains.clear_backup();
    }

    /// Advances the tuner by one control tick.
    ///
    /// `now_ms` is a monotonic millisecond clock and `dt` the tick
    /// duration in seconds.
    pub fn update<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32, dt: T)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        let (pilot_roll, pilot_pitch, pilot_yaw_rate) = adapter.pilot_desired_rp_yrate();
        let threshold = num::<T>(OVERRIDE_STICK_THRESHOLD);
        let sticks_deflected = pilot_roll.abs() > threshold
            || pilot_pitch.abs() > threshold
            || pilot_yaw_rate.abs() > threshold;

        if self.mode != TuneMode::Tuning {
            if self.mode == TuneMode::Success && sticks_deflected && !self.pilot_testing_reported
            {
                adapter.write_event(TuneEvent::PilotTesting);
                self.pilot_testing_reported = true;
            }
            return;
        }

        adapter.request_climb_rate(adapter.pilot_desired_climb_rate());

        if elapsed(now_ms, self.last_announce_ms) >= ANNOUNCE_INTERVAL_MS {
            adapter.do_gcs_announcements();
            self.last_announce_ms = now_ms;
        }

        if sticks_deflected {
            self.begin_override(ctrl, adapter, now_ms);
            ctrl.input_angles(pilot_roll, pilot_pitch, self.desired_yaw);
            self.desired_yaw = ctrl.measured_angle(Axis::Yaw);
            return;
        }
        if self.override_active {
            if elapsed(now_ms, self.override_expires_ms) >= u32::MAX / 2 {
                // Still inside the cooldown.
                ctrl.input_angles(T::zero(), T::zero(), self.desired_yaw);
                self.step_start_ms = now_ms;
                return;
            }
            self.override_active = false;
        }

        match self.step {
            StepType::WaitingForLevel => self.run_waiting_for_level(ctrl, adapter, now_ms),
            StepType::Testing => self.run_testing(ctrl, adapter, now_ms, dt),
            StepType::UpdateGains => self.run_update_gains(ctrl, adapter, now_ms),
        }
    }

    fn begin_override<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        if self.gains.active() != GainType::Original {
            self.gains.load_gains(GainType::Original, ctrl, adapter);
        }
        self.step = StepType::WaitingForLevel;
        self.pending_outcome = None;
        self.level.reset();
        self.step_start_ms = now_ms;
        self.override_active = true;
        self.override_expires_ms = now_ms.wrapping_add(OVERRIDE_COOLDOWN_MS);
    }

    fn run_waiting_for_level<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        // Complete is a terminal marker, not a test to run.
        if self.current_tune_type(adapter) == TuneType::Complete {
            self.finish_axis(ctrl, adapter);
            if self.mode == TuneMode::Tuning {
                self.enter_waiting_for_level(ctrl, adapter, now_ms, GainType::IntraTest);
            }
            return;
        }

        let (hold_roll, hold_pitch) = if self.config.use_poshold && adapter.position_ok() {
            adapter.poshold_attitude()
        } else {
            (T::zero(), T::zero())
        };
        ctrl.input_angles(hold_roll, hold_pitch, self.desired_yaw);

        if self.level.currently_level(ctrl, self.desired_yaw, now_ms) {
            self.level_fail_count = 0;
            self.begin_test(ctrl, adapter, now_ms);
        } else if elapsed(now_ms, self.step_start_ms) >= LEVEL_TIMEOUT_MS {
            self.level_fail_count += 1;
            adapter.level_failed(self.level.issue_string());
            if self.level_fail_count >= LEVEL_FAIL_LIMIT {
                self.fail(ctrl, adapter);
            } else {
                self.step_start_ms = now_ms;
                self.level.reset();
            }
        }
    }

    fn begin_test<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        let tune_type = self.current_tune_type(adapter);
        let kind = adapter.test_kind(tune_type);
        let direction = if self.positive_direction {
            T::one()
        } else {
            -T::one()
        };
        let start_angle = ctrl.measured_angle(self.axis);

        self.gains.load_gains(GainType::Test, ctrl, adapter);
        match kind {
            TestKind::TwitchRate => {
                let target = if self.axis == Axis::Yaw {
                    num(TWITCH_RATE_YAW_DPS)
                } else {
                    num(TWITCH_RATE_RP_DPS)
                };
                self.twitch
                    .init_rate(target, direction, start_angle, now_ms, TWITCH_TIME_LIMIT_MS);
            }
            TestKind::TwitchAngle => {
                let target = if self.axis == Axis::Yaw {
                    num(TWITCH_ANGLE_YAW_DEG)
                } else {
                    num(TWITCH_ANGLE_RP_DEG)
                };
                self.twitch
                    .init_angle(target, direction, start_angle, now_ms, TWITCH_TIME_LIMIT_MS);
            }
            TestKind::DwellRate => {
                self.dwell
                    .init_rate(self.dwell_frequency(tune_type), num(DWELL_RATE_AMPLITUDE_DPS));
            }
            TestKind::DwellAngle => {
                self.dwell
                    .init_angle(self.dwell_frequency(tune_type), num(DWELL_ANGLE_AMPLITUDE_DEG));
            }
            TestKind::FeedForward => {
                self.feedforward.init(num(FF_TARGET_RATE_DPS), direction);
            }
        }
        self.current_test = kind;
        self.step = StepType::Testing;
        self.step_start_ms = now_ms;
        if elapsed(now_ms, self.last_testing_announce_ms) >= ANNOUNCE_INTERVAL_MS {
            adapter.gcs_announce(TuneMessage::Testing);
            self.last_testing_announce_ms = now_ms;
        }
    }

    fn dwell_frequency(&self, tune_type: TuneType) -> T {
        if tune_type == TuneType::MaxGains {
            self.policy.sweep_frequency()
        } else {
            num(DWELL_DEFAULT_HZ)
        }
    }

    fn run_testing<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32, dt: T)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        adapter.log_pids();
        adapter.log_autotune_details();

        let progress = match self.current_test {
            TestKind::TwitchRate | TestKind::TwitchAngle => {
                self.twitch.run(ctrl, self.axis, now_ms, dt)
            }
            TestKind::DwellRate | TestKind::DwellAngle => self.dwell.run(ctrl, self.axis, dt),
            TestKind::FeedForward => self.feedforward.run(ctrl, self.axis, dt),
        };
        if progress == Progress::Running {
            return;
        }

        self.pending_outcome = Some(match (self.current_test, progress) {
            (TestKind::TwitchRate | TestKind::TwitchAngle, Progress::Complete) => {
                self.twitch.outcome()
            }
            (TestKind::DwellRate | TestKind::DwellAngle, _) => self.dwell.outcome(),
            (TestKind::FeedForward, Progress::Complete) => self.feedforward.outcome(),
            _ => TestOutcome::Aborted,
        });
        adapter.log_autotune();
        self.gains.load_gains(GainType::IntraTest, ctrl, adapter);
        self.step = StepType::UpdateGains;
        self.step_start_ms = now_ms;
    }

    fn run_update_gains<C, A>(&mut self, ctrl: &mut C, adapter: &mut A, now_ms: u32)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        let tune_type = self.current_tune_type(adapter);
        let outcome = self.pending_outcome.take().unwrap_or(TestOutcome::Aborted);

        let mut candidate = self.gains.test_gains(self.axis);
        if matches!(
            self.current_test,
            TestKind::TwitchRate | TestKind::TwitchAngle
        ) && self.twitch.accel_max() > candidate.accel_max
        {
            // Record the acceleration the airframe actually achieved.
            candidate.accel_max = self.twitch.accel_max();
        }
        let verdict = self
            .policy
            .update(tune_type, self.axis, &mut candidate, &outcome, adapter);
        self.gains.set_test_gains(self.axis, &candidate);
        if self.policy.take_reached_limit() {
            adapter.write_event(TuneEvent::ReachedLimit);
        }

        match verdict {
            Verdict::Advance => self.advance_stage(ctrl, adapter),
            Verdict::Retry => {}
            Verdict::RetryBoostStep => {
                // A step that cannot grow further will never wake the
                // response up; spend the retry budget instead.
                if self.twitch.step_at_max() {
                    if self.policy.count_retry() == Verdict::Failed {
                        self.fail(ctrl, adapter);
                        return;
                    }
                } else {
                    self.twitch.boost_step();
                }
            }
            Verdict::Failed => {
                self.fail(ctrl, adapter);
                return;
            }
        }
        if self.mode == TuneMode::Tuning {
            self.positive_direction = !self.positive_direction;
            self.enter_waiting_for_level(ctrl, adapter, now_ms, GainType::IntraTest);
        }
    }

    fn advance_stage<C, A>(&mut self, ctrl: &mut C, adapter: &mut A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        self.tune_seq_index += 1;
        if self.tune_seq_index < adapter.tune_sequence().len()
            && self.current_tune_type(adapter) != TuneType::Complete
        {
            self.policy.reset_for_stage(self.current_tune_type(adapter));
            return;
        }
        self.finish_axis(ctrl, adapter);
    }

    fn finish_axis<C, A>(&mut self, ctrl: &mut C, adapter: &mut A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        self.gains.finalise_axis(self.axis, adapter);
        self.axes_completed |= self.axis.bit();
        self.tune_seq_index = 0;
        self.twitch.reset_scaler();
        self.policy.reset_for_axis();
        match self.next_axis() {
            Some(axis) => {
                self.axis = axis;
                self.policy.reset_for_stage(self.current_tune_type(adapter));
            }
            None => self.succeed(ctrl, adapter),
        }
    }

    fn succeed<C, A>(&mut self, ctrl: &mut C, adapter: &mut A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        self.gains.load_gains(GainType::Tuned, ctrl, adapter);
        self.mode = TuneMode::Success;
        adapter.write_event(TuneEvent::Success);
        adapter.gcs_announce(TuneMessage::Success);
    }

    fn fail<C, A>(&mut self, ctrl: &mut C, adapter: &mut A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        self.gains.load_gains(GainType::Original, ctrl, adapter);
        self.mode = TuneMode::Failed;
        adapter.write_event(TuneEvent::Failed);
        adapter.gcs_announce(TuneMessage::Failed);
    }

    fn enter_waiting_for_level<C, A>(
        &mut self,
        ctrl: &mut C,
        adapter: &mut A,
        now_ms: u32,
        gain_type: GainType,
    ) where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        self.gains.load_gains(gain_type, ctrl, adapter);
        self.desired_yaw = ctrl.measured_angle(Axis::Yaw);
        self.level.reset();
        self.step = StepType::WaitingForLevel;
        self.step_start_ms = now_ms;
    }

    fn current_tune_type<A: VehicleAdapter<T>>(&self, adapter: &A) -> TuneType {
        adapter
            .tune_sequence()
            .get(self.tune_seq_index)
            .copied()
            .unwrap_or(TuneType::Complete)
    }

    fn next_axis(&self) -> Option<Axis> {
        Axis::ALL
            .into_iter()
            .find(|axis| self.config.axis_bitmask & axis.bit() != 0
                && self.axes_completed & axis.bit() == 0)
    }
}

fn elapsed(now_ms: u32, start_ms: u32) -> u32 {
    now_ms.wrapping_sub(start_ms)
}
