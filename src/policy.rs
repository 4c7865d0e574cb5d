// src/policy.rs

//! # Gain Update Policy Module
//!
//! Interprets the outcome of each completed excitation test and moves
//! the candidate gains.  Every tuning stage brackets one gain: the Up
//! stages grow it until the response shows the wanted overshoot, the
//! Down stages shrink it until the overshoot disappears, and a stage
//! advances once the response has stayed inside the band for
//! [`SUCCESS_COUNT`] consecutive tests or the gain has hit its allowed
//! limit.

use crate::frequency::DwellResult;
use crate::gains::AxisGains;
use crate::vehicle::{num, Axis, Number, VehicleAdapter};

/// Consecutive in-band tests required to finish a tuning stage.
pub const SUCCESS_COUNT: u8 = 4;
/// Failed or inconclusive tests tolerated before a stage gives up.
pub const MAX_RETRIES: u8 = 8;

/// Multiplier applied when growing a gain.
const GAIN_UP_MULTIPLIER: f32 = 1.25;
/// Multiplier applied when shrinking a rate gain.
const GAIN_DOWN_MULTIPLIER: f32 = 0.75;
/// Multiplier applied when shrinking an angle gain.
const ANGLE_DOWN_MULTIPLIER: f32 = 0.9;
/// Absolute ceiling on rate P.
const RATE_P_MAX: f32 = 2.0;
/// Absolute ceiling on rate D.
const RATE_D_MAX: f32 = 0.04;
/// Absolute ceiling on angle P.
const ANGLE_P_MAX: f32 = 20.0;
/// Absolute ceiling on rate feedforward.
const RATE_FF_MAX: f32 = 0.5;
/// Ceiling on the yaw rate filter cutoff, Hz.
const YAW_RATE_FILT_MAX_HZ: f32 = 5.0;
/// Response below this fraction of the target is too weak to judge.
const WEAK_RESPONSE_FRACTION: f32 = 0.75;
/// Relative band around the feedforward estimate accepted as tuned.
const FF_BAND: f32 = 0.05;

/// First dwell frequency of the maximum-gain sweep, Hz.
const MAX_GAINS_START_HZ: f32 = 1.0;
/// Last dwell frequency of the maximum-gain sweep, Hz.
const MAX_GAINS_MAX_HZ: f32 = 8.0;
/// Frequency multiplier between sweep dwells.
const MAX_GAINS_FREQ_STEP: f32 = 1.25;
/// Phase lag at which the rate P margin is measured, degrees.
const MAX_GAIN_P_PHASE_DEG: f32 = 150.0;
/// Phase lag at which the rate D margin is measured, degrees.
const MAX_GAIN_D_PHASE_DEG: f32 = 240.0;
/// Loop gain kept in reserve when deriving the rate P ceiling.
const MAX_GAIN_P_MARGIN: f32 = 0.5;
/// Loop gain kept in reserve when deriving the rate D ceiling.
const MAX_GAIN_D_MARGIN: f32 = 0.25;

/// Ordered tuning stages of a gain being bracketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TuneType {
    /// Grow rate D until overshoot appears.
    RateDUp,
    /// Shrink rate D until overshoot disappears.
    RateDDown,
    /// Grow rate P until overshoot appears.
    RatePUp,
    /// Shrink rate P until overshoot disappears.
    RatePDown,
    /// Shrink angle P until overshoot disappears.
    AnglePDown,
    /// Grow angle P until overshoot appears.
    AnglePUp,
    /// Grow rate feedforward toward the measured estimate.
    RateFfUp,
    /// Shrink rate feedforward toward the measured estimate.
    RateFfDown,
    /// Sweep dwell frequencies to find the maximum safe rate gains.
    MaxGains,
    /// Marker: all stages of the axis are done.
    Complete,
}

impl TuneType {
    /// Stage name for operator reporting.
    pub fn as_str(self) -> &'static str {
        match self {
            TuneType::RateDUp => "Rate D Up",
            TuneType::RateDDown => "Rate D Down",
            TuneType::RatePUp => "Rate P Up",
            TuneType::RatePDown => "Rate P Down",
            TuneType::AnglePDown => "Angle P Down",
            TuneType::AnglePUp => "Angle P Up",
            TuneType::RateFfUp => "Rate FF Up",
            TuneType::RateFfDown => "Rate FF Down",
            TuneType::MaxGains => "Max Gains",
            TuneType::Complete => "Complete",
        }
    }
}

/// Default multirotor tuning sequence.
pub const DEFAULT_TUNE_SEQUENCE: [TuneType; 5] = [
    TuneType::RateDUp,
    TuneType::RateDDown,
    TuneType::RatePUp,
    TuneType::AnglePDown,
    TuneType::AnglePUp,
];

/// Result of one completed or abandoned excitation test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestOutcome<T> {
    /// Peak summary of a step twitch.
    Twitch {
        /// Commanded step size, deg/s or degrees.
        target: T,
        /// Lowest rate after the peak, deg/s.
        rate_min: T,
        /// Highest rate reached, deg/s.
        rate_max: T,
        /// Lowest angle after the peak, degrees.
        angle_min: T,
        /// Highest angle reached, degrees.
        angle_max: T,
    },
    /// Frequency response point of a completed dwell.
    Dwell(DwellResult<T>),
    /// Steady-state feedforward estimate.
    FeedForward {
        /// Output per unit rate seen at steady state.
        measured: T,
    },
    /// The test saturated the motors and measured nothing usable.
    Saturated,
    /// The test tripped a safety bound and was cut short.
    Aborted,
    /// The test ran out of time without a stable measurement.
    TimedOut,
}

/// What the state machine should do after a gain update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// The stage is finished; move to the next tune type.
    Advance,
    /// Run another test of the same stage.
    Retry,
    /// Run another test with a larger excitation step.
    RetryBoostStep,
    /// The stage cannot make progress; fail the tune.
    Failed,
}

/// Maximum safe gain found by the frequency sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxGainData<T> {
    /// Dwell frequency at which the margin was measured, Hz.
    pub freq: T,
    /// Measured phase lag at that frequency, degrees.
    pub phase: T,
    /// Measured response gain at that frequency.
    pub gain: T,
    /// Largest gain value considered safe.
    pub max_allowed: T,
}

/// Moves the candidate gains of one axis from test outcomes.
///
/// The policy owns the per-stage success and retry counters and the
/// maximum-gain sweep state; the state machine resets it at each stage
/// boundary.
#[derive(Debug, Clone)]
pub struct GainUpdatePolicy<T> {
    aggressiveness: T,
    min_d: T,
    success_count: u8,
    retry_count: u8,
    reached_limit: bool,
    dwell_freq: T,
    max_rate_p: Option<MaxGainData<T>>,
    max_rate_d: Option<MaxGainData<T>>,
}

impl<T: Number> GainUpdatePolicy<T> {
    /// Creates a policy with the given overshoot band and rate D floor.
    pub fn new(aggressiveness: T, min_d: T) -> Self {
        GainUpdatePolicy {
            aggressiveness,
            min_d,
            success_count: 0,
            retry_count: 0,
            reached_limit: false,
            dwell_freq: num(MAX_GAINS_START_HZ),
            max_rate_p: None,
            max_rate_d: None,
        }
    }

    /// Clears the per-stage counters at a stage boundary.
    pub fn reset_for_stage(&mut self, tune_type: TuneType) {
        self.success_count = 0;
        self.retry_count = 0;
        if tune_type == TuneType::MaxGains {
            self.dwell_freq = num(MAX_GAINS_START_HZ);
            self.max_rate_p = None;
            self.max_rate_d = None;
        }
    }

    /// Clears the maximum-gain sweep results for a new axis.
    pub fn reset_for_axis(&mut self) {
        self.max_rate_p = None;
        self.max_rate_d = None;
    }

    /// Dwell frequency the maximum-gain sweep wants next, Hz.
    pub fn sweep_frequency(&self) -> T {
        self.dwell_freq
    }

    /// Maximum safe rate P found by the sweep, if any.
    pub fn max_rate_p(&self) -> Option<&MaxGainData<T>> {
        self.max_rate_p.as_ref()
    }

    /// Maximum safe rate D found by the sweep, if any.
    pub fn max_rate_d(&self) -> Option<&MaxGainData<T>> {
        self.max_rate_d.as_ref()
    }

    /// Returns and clears the limit flag set when a gain hit its bound.
    pub fn take_reached_limit(&mut self) -> bool {
        let hit = self.reached_limit;
        self.reached_limit = false;
        hit
    }

    /// Consecutive in-band tests seen so far this stage.
    pub fn success_count(&self) -> u8 {
        self.success_count
    }

    /// Updates the candidate gains of one axis from a test outcome.
    pub fn update<A: VehicleAdapter<T>>(
        &mut self,
        tune_type: TuneType,
        axis: Axis,
        gains: &mut AxisGains<T>,
        outcome: &TestOutcome<T>,
        adapter: &A,
    ) -> Verdict {
        match outcome {
            TestOutcome::Aborted | TestOutcome::Saturated | TestOutcome::TimedOut => {
                self.success_count = 0;
                self.count_retry()
            }
            TestOutcome::Twitch {
                target,
                rate_min,
                rate_max,
                angle_min,
                angle_max,
            } => match tune_type {
                TuneType::RateDUp | TuneType::RateDDown | TuneType::RatePUp
                | TuneType::RatePDown => self.update_rate_gain(
                    tune_type, axis, gains, *target, *rate_min, *rate_max, adapter,
                ),
                TuneType::AnglePUp | TuneType::AnglePDown => self.update_angle_gain(
                    tune_type, gains, *target, *angle_min, *angle_max, adapter,
                ),
                _ => self.count_retry(),
            },
            TestOutcome::FeedForward { measured } => match tune_type {
                TuneType::RateFfUp | TuneType::RateFfDown => {
                    self.update_feedforward(tune_type, gains, *measured)
                }
                _ => self.count_retry(),
            },
            TestOutcome::Dwell(result) => match tune_type {
                TuneType::MaxGains => self.update_max_gains(gains, result),
                _ => self.count_retry(),
            },
        }
    }

    fn update_rate_gain<A: VehicleAdapter<T>>(
        &mut self,
        tune_type: TuneType,
        axis: Axis,
        gains: &mut AxisGains<T>,
        target: T,
        rate_min: T,
        rate_max: T,
        adapter: &A,
    ) -> Verdict {
        if rate_max < target * num(WEAK_RESPONSE_FRACTION) {
            self.success_count = 0;
            return Verdict::RetryBoostStep;
        }
        let overshoot = (rate_max - rate_min) / rate_max;
        let band = self.aggressiveness;
        // Yaw carries no rate D; its D stages bracket the rate target
        // filter cutoff instead.
        let yaw_filter = axis == Axis::Yaw
            && matches!(tune_type, TuneType::RateDUp | TuneType::RateDDown);

        match tune_type {
            TuneType::RateDUp | TuneType::RatePUp => {
                if overshoot >= band {
                    return self.count_success();
                }
                self.success_count = 0;
                let hit_limit = if yaw_filter {
                    raise(&mut gains.rate_filt, num(YAW_RATE_FILT_MAX_HZ))
                } else if tune_type == TuneType::RateDUp {
                    raise(&mut gains.rate_d, self.rate_d_cap())
                } else {
                    raise(&mut gains.rate_p, self.rate_p_cap())
                };
                if hit_limit {
                    self.reached_limit = true;
                    return Verdict::Advance;
                }
                Verdict::Retry
            }
            _ => {
                if overshoot < band {
                    return self.count_success();
                }
                self.success_count = 0;
                let hit_limit = if yaw_filter {
                    lower(&mut gains.rate_filt, adapter.yaw_rate_filt_min())
                } else if tune_type == TuneType::RateDDown {
                    lower(&mut gains.rate_d, self.min_d)
                } else {
                    let floor = if adapter.allow_zero_rate_p() {
                        T::zero()
                    } else {
                        adapter.rate_p_min()
                    };
                    lower(&mut gains.rate_p, floor)
                };
                if hit_limit {
                    self.reached_limit = true;
                    return Verdict::Advance;
                }
                Verdict::Retry
            }
        }
    }

    fn update_angle_gain<A: VehicleAdapter<T>>(
        &mut self,
        tune_type: TuneType,
        gains: &mut AxisGains<T>,
        target: T,
        _angle_min: T,
        angle_max: T,
        adapter: &A,
    ) -> Verdict {
        if angle_max < target * num(WEAK_RESPONSE_FRACTION) {
            self.success_count = 0;
            return Verdict::RetryBoostStep;
        }
        let overshoot = ((angle_max - target) / target).max(T::zero());
        let band = self.aggressiveness;

        if tune_type == TuneType::AnglePUp {
            if overshoot >= band {
                return self.count_success();
            }
            self.success_count = 0;
            if raise(&mut gains.angle_p, num(ANGLE_P_MAX)) {
                self.reached_limit = true;
                return Verdict::Advance;
            }
            Verdict::Retry
        } else {
            if overshoot < band {
                return self.count_success();
            }
            self.success_count = 0;
            gains.angle_p = gains.angle_p * num(ANGLE_DOWN_MULTIPLIER);
            if gains.angle_p <= adapter.angle_p_min() {
                gains.angle_p = adapter.angle_p_min();
                self.reached_limit = true;
                return Verdict::Advance;
            }
            Verdict::Retry
        }
    }

    fn update_feedforward(
        &mut self,
        tune_type: TuneType,
        gains: &mut AxisGains<T>,
        measured: T,
    ) -> Verdict {
        if measured <= T::zero() {
            self.success_count = 0;
            return self.count_retry();
        }
        let band = num::<T>(FF_BAND);
        if tune_type == TuneType::RateFfUp {
            if gains.rate_ff >= measured * (T::one() - band) {
                return self.count_success();
            }
            self.success_count = 0;
            // Seed from the measurement when starting from nothing.
            let grown = (gains.rate_ff * num(GAIN_UP_MULTIPLIER)).max(measured * num(0.1));
            let capped = grown.min(measured);
            if capped >= num(RATE_FF_MAX) {
                gains.rate_ff = num(RATE_FF_MAX);
                self.reached_limit = true;
                return Verdict::Advance;
            }
            gains.rate_ff = capped;
            Verdict::Retry
        } else {
            if gains.rate_ff <= measured * (T::one() + band) {
                return self.count_success();
            }
            self.success_count = 0;
            gains.rate_ff = (gains.rate_ff * num(GAIN_DOWN_MULTIPLIER)).max(measured);
            Verdict::Retry
        }
    }

    fn update_max_gains(&mut self, gains: &AxisGains<T>, result: &DwellResult<T>) -> Verdict {
        if result.gain > T::epsilon() {
            if self.max_rate_p.is_none() && result.phase >= num(MAX_GAIN_P_PHASE_DEG) {
                self.max_rate_p = Some(MaxGainData {
                    freq: result.frequency,
                    phase: result.phase,
                    gain: result.gain,
                    max_allowed: gains.rate_p * num::<T>(MAX_GAIN_P_MARGIN) / result.gain,
                });
            }
            if self.max_rate_d.is_none() && result.phase >= num(MAX_GAIN_D_PHASE_DEG) {
                let rate_d = gains.rate_d.max(self.min_d);
                self.max_rate_d = Some(MaxGainData {
                    freq: result.frequency,
                    phase: result.phase,
                    gain: result.gain,
                    max_allowed: rate_d * num::<T>(MAX_GAIN_D_MARGIN) / result.gain,
                });
            }
        }
        if self.max_rate_p.is_some() && self.max_rate_d.is_some() {
            return Verdict::Advance;
        }
        self.dwell_freq = self.dwell_freq * num(MAX_GAINS_FREQ_STEP);
        if self.dwell_freq > num(MAX_GAINS_MAX_HZ) {
            // The sweep ran out of frequencies; keep whatever margins
            // were found and fall back to the static ceilings.
            self.reached_limit = true;
            return Verdict::Advance;
        }
        Verdict::Retry
    }

    fn rate_p_cap(&self) -> T {
        match &self.max_rate_p {
            Some(data) => data.max_allowed.min(num(RATE_P_MAX)),
            None => num(RATE_P_MAX),
        }
    }

    fn rate_d_cap(&self) -> T {
        match &self.max_rate_d {
            Some(data) => data.max_allowed.min(num(RATE_D_MAX)),
            None => num(RATE_D_MAX),
        }
    }

    fn count_success(&mut self) -> Verdict {
        self.success_count += 1;
        if self.success_count >= SUCCESS_COUNT {
            Verdict::Advance
        } else {
            Verdict::Retry
        }
    }

    /// Counts a failed or inconclusive test against the stage's retry
    /// budget.
    pub fn count_retry(&mut self) -> Verdict {
        self.retry_count += 1;
        if self.retry_count > MAX_RETRIES {
            Verdict::Failed
        } else {
            Verdict::Retry
        }
    }
}

/// Grows a gain by the up multiplier, clamped to `cap`.
/// Returns true if the cap was hit.
fn raise<T: Number>(gain: &mut T, cap: T) -> bool {
    let grown = *gain * num::<T>(GAIN_UP_MULTIPLIER);
    raise_to(gain, grown, cap)
}

fn raise_to<T: Number>(gain: &mut T, value: T, cap: T) -> bool {
    if value >= cap {
        *gain = cap;
        true
    } else {
        *gain = value;
        false
    }
}

/// Shrinks a gain by the down multiplier, clamped to `floor`.
/// Returns true if the floor was hit.
fn lower<T: Number>(gain: &mut T, floor: T) -> bool {
    let shrunk = *gain * num::<T>(GAIN_DOWN_MULTIPLIER);
    if shrunk <= floor {
        *gain = floor;
        true
    } else {
        *gain = shrunk;
        false
    }
}
