// src/frequency.rs

//! # Frequency Response Estimator Module
//!
//! Turns a dwell's filtered command and response time-series into a
//! (gain, phase) point at the excitation frequency.
//!
//! The estimator correlates both signals against quadrature references
//! at the excitation frequency: per completed cycle the in-phase and
//! quadrature integrals give each signal's amplitude and phase, whose
//! ratio and difference are the cycle's gain and phase-lag estimate.
//! Because both signals share the same reference and the same low-pass
//! filtering, discretisation bias and filter lag cancel in the result.
//! The first cycle is discarded as transient; estimates accumulate over
//! [`DWELL_CYCLES`] further cycles and the dwell is complete once they
//! have stabilised.

use crate::vehicle::{num, Number};

/// Number of full excitation cycles accumulated per dwell.
pub const DWELL_CYCLES: usize = 6;

/// Relative spread of per-cycle gains accepted as stable.
const GAIN_SPREAD_TOLERANCE: f32 = 0.2;
/// Spread of per-cycle phases accepted as stable, degrees.
const PHASE_SPREAD_TOLERANCE_DEG: f32 = 20.0;

/// Frequency response point produced by a completed dwell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DwellResult<T> {
    /// Excitation frequency in Hz.
    pub frequency: T,
    /// Response amplitude over command amplitude.
    pub gain: T,
    /// Response phase lag behind the command, degrees in [0, 360).
    pub phase: T,
}

/// Accumulates quadrature correlations of a dwell's command and
/// response signals into per-cycle gain and phase estimates.
#[derive(Debug, Clone)]
pub struct FrequencyResponse<T> {
    freq_hz: T,
    omega: T,
    cycle_phase: T,
    cycle: usize,
    tgt_i: T,
    tgt_q: T,
    meas_i: T,
    meas_q: T,
    gains: [T; DWELL_CYCLES],
    phases: [T; DWELL_CYCLES],
    stored: usize,
    max_accel: T,
    prev_rate: T,
    have_prev_rate: bool,
}

impl<T: Number> FrequencyResponse<T> {
    /// Creates an estimator for the given excitation frequency in Hz.
    pub fn new(freq_hz: T) -> Self {
        let mut estimator = FrequencyResponse {
            freq_hz: T::zero(),
            omega: T::zero(),
            cycle_phase: T::zero(),
            cycle: 0,
            tgt_i: T::zero(),
            tgt_q: T::zero(),
            meas_i: T::zero(),
            meas_q: T::zero(),
            gains: [T::zero(); DWELL_CYCLES],
            phases: [T::zero(); DWELL_CYCLES],
            stored: 0,
            max_accel: T::zero(),
            prev_rate: T::zero(),
            have_prev_rate: false,
        };
        estimator.reset(freq_hz);
        estimator
    }

    /// Clears all accumulators for a fresh dwell at the given frequency.
    pub fn reset(&mut self, freq_hz: T) {
        self.freq_hz = freq_hz;
        self.omega = num::<T>(core::f32::consts::TAU) * freq_hz;
        self.cycle_phase = T::zero();
        self.cycle = 0;
        self.tgt_i = T::zero();
        self.tgt_q = T::zero();
        self.meas_i = T::zero();
        self.meas_q = T::zero();
        self.gains = [T::zero(); DWELL_CYCLES];
        self.phases = [T::zero(); DWELL_CYCLES];
        self.stored = 0;
        self.max_accel = T::zero();
        self.prev_rate = T::zero();
        self.have_prev_rate = false;
    }

    /// Accumulates one sample of the filtered command and measured
    /// response over the time step `dt`.
    pub fn update(&mut self, target: T, measured: T, dt: T) {
        if dt <= T::zero() || self.omega <= T::zero() {
            return;
        }
        let sin_ref = self.cycle_phase.sin();
        let cos_ref = self.cycle_phase.cos();
        self.tgt_i = self.tgt_i + target * sin_ref * dt;
        self.tgt_q = self.tgt_q + target * cos_ref * dt;
        self.meas_i = self.meas_i + measured * sin_ref * dt;
        self.meas_q = self.meas_q + measured * cos_ref * dt;

        self.cycle_phase = self.cycle_phase + self.omega * dt;
        let tau = num::<T>(core::f32::consts::TAU);
        if self.cycle_phase >= tau {
            self.cycle_phase = self.cycle_phase - tau;
            self.finish_cycle();
        }
    }

    /// Accumulates one angle-dwell sample, additionally tracking the
    /// peak angular acceleration seen on the measured rate.
    pub fn update_angle(&mut self, command: T, measured_angle: T, measured_rate: T, dt: T) {
        if dt > T::zero() {
            if self.have_prev_rate {
                let accel = ((measured_rate - self.prev_rate) / dt).abs();
                if accel > self.max_accel {
                    self.max_accel = accel;
                }
            }
            self.prev_rate = measured_rate;
            self.have_prev_rate = true;
        }
        self.update(command, measured_angle, dt);
    }

    fn finish_cycle(&mut self) {
        // The first cycle carries the startup transient.
        if self.cycle > 0 && self.stored < DWELL_CYCLES {
            let tgt_amp = (self.tgt_i * self.tgt_i + self.tgt_q * self.tgt_q).sqrt();
            let meas_amp = (self.meas_i * self.meas_i + self.meas_q * self.meas_q).sqrt();
            if tgt_amp > T::epsilon() && meas_amp > T::epsilon() {
                let tgt_phase = self.tgt_q.atan2(self.tgt_i);
                let meas_phase = self.meas_q.atan2(self.meas_i);
                let full = num::<T>(360.0);
                let mut lag = (tgt_phase - meas_phase).to_degrees();
                while lag < T::zero() {
                    lag = lag + full;
                }
                while lag >= full {
                    lag = lag - full;
                }
                self.gains[self.stored] = meas_amp / tgt_amp;
                self.phases[self.stored] = lag;
                self.stored += 1;
            }
        }
        self.cycle += 1;
        self.tgt_i = T::zero();
        self.tgt_q = T::zero();
        self.meas_i = T::zero();
        self.meas_q = T::zero();
    }

    /// True once [`DWELL_CYCLES`] cycles have been accumulated and the
    /// per-cycle estimates have stabilised.
    pub fn cycles_complete(&self) -> bool {
        if self.stored < DWELL_CYCLES {
            return false;
        }
        let (gain_mean, _) = self.means();
        let mut gain_min = self.gains[0];
        let mut gain_max = self.gains[0];
        let mut phase_min = self.phases[0];
        let mut phase_max = self.phases[0];
        for i in 1..DWELL_CYCLES {
            gain_min = gain_min.min(self.gains[i]);
            gain_max = gain_max.max(self.gains[i]);
            phase_min = phase_min.min(self.phases[i]);
            phase_max = phase_max.max(self.phases[i]);
        }
        let gain_ok = gain_max - gain_min
            <= gain_mean * num(GAIN_SPREAD_TOLERANCE) + T::epsilon();
        let phase_ok = phase_max - phase_min <= num(PHASE_SPREAD_TOLERANCE_DEG);
        gain_ok && phase_ok
    }

    /// Averaged frequency response once the dwell is complete.
    pub fn result(&self) -> Option<DwellResult<T>> {
        if !self.cycles_complete() {
            return None;
        }
        let (gain, phase) = self.means();
        Some(DwellResult {
            frequency: self.freq_hz,
            gain,
            phase,
        })
    }

    /// Peak angular acceleration seen during an angle dwell, deg/s^2.
    pub fn max_accel(&self) -> T {
        self.max_accel
    }

    fn means(&self) -> (T, T) {
        let mut gain_sum = T::zero();
        let mut phase_sum = T::zero();
        for i in 0..DWELL_CYCLES {
            gain_sum = gain_sum + self.gains[i];
            phase_sum = phase_sum + self.phases[i];
        }
        let count = num::<T>(DWELL_CYCLES as f32);
        (gain_sum / count, phase_sum / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    const DT: f32 = 0.0025;

    /// Feeds a synthetic plant response `gain`, `phase_deg` at `freq_hz`
    /// for the given number of cycles.
    fn run_dwell(
        estimator: &mut FrequencyResponse<f32>,
        freq_hz: f32,
        gain: f32,
        phase_deg: f32,
        cycles: f32,
    ) {
        let omega = core::f32::consts::TAU * freq_hz;
        let steps = (cycles / freq_hz / DT) as usize;
        for n in 0..steps {
            let t = n as f32 * DT;
            let target = 10.0 * (omega * t).sin();
            let measured = gain * 10.0 * (omega * t - phase_deg.to_radians()).sin();
            estimator.update(target, measured, DT);
        }
    }

    /// The estimator converges to a known amplitude ratio and phase lag.
    #[test]
    fn test_determine_gain_converges_to_known_response() {
        for (freq, gain, phase) in [(1.0, 0.5, 30.0), (2.5, 1.4, 120.0), (4.0, 0.9, 200.0)] {
            let mut estimator = FrequencyResponse::new(freq);
            run_dwell(&mut estimator, freq, gain, phase, (DWELL_CYCLES + 2) as f32);
            let result = estimator
                .result()
                .expect("dwell should be complete after enough cycles");
            assert!(
                (result.gain - gain).abs() < 0.02,
                "Gain estimate {} should match {}.",
                result.gain,
                gain
            );
            assert!(
                (result.phase - phase).abs() < 2.0,
                "Phase estimate {} should match {}.",
                result.phase,
                phase
            );
        }
    }

    /// Completion is not reported before the cycle count is reached.
    #[test]
    fn test_cycles_complete_false_before_count() {
        let mut estimator = FrequencyResponse::new(2.0);
        run_dwell(&mut estimator, 2.0, 1.0, 45.0, DWELL_CYCLES as f32);
        assert!(
            !estimator.cycles_complete(),
            "The transient cycle is discarded, so the count is not yet reached."
        );
        run_dwell(&mut estimator, 2.0, 1.0, 45.0, 1.5);
        assert!(estimator.cycles_complete());
    }

    /// Reset clears all accumulators for a fresh dwell.
    #[test]
    fn test_reset_clears_accumulators() {
        let mut estimator = FrequencyResponse::new(2.0);
        run_dwell(&mut estimator, 2.0, 1.0, 45.0, (DWELL_CYCLES + 2) as f32);
        assert!(estimator.cycles_complete());

        estimator.reset(3.0);
        assert!(!estimator.cycles_complete());
        assert!(estimator.result().is_none());
    }

    /// The angle variant tracks the peak acceleration of the rate trace.
    #[test]
    fn test_angle_variant_tracks_peak_acceleration() {
        let mut estimator = FrequencyResponse::new(1.0);
        let omega = core::f32::consts::TAU;
        let mut prev_rate = 0.0;
        let mut expected = 0.0f32;
        for n in 0..400 {
            let t = n as f32 * DT;
            let rate = 50.0 * (omega * t).sin();
            if n > 0 {
                expected = expected.max(((rate - prev_rate) / DT).abs());
            }
            prev_rate = rate;
            estimator.update_angle((omega * t).sin(), 0.0, rate, DT);
        }
        assert!(value_close(expected, estimator.max_accel()));
    }

    /// A noisy, unstabilised response does not report completion.
    #[test]
    fn test_unstable_estimates_block_completion() {
        let mut estimator = FrequencyResponse::new(1.0);
        let omega = core::f32::consts::TAU;
        let steps = ((DWELL_CYCLES + 3) as f32 / DT) as usize;
        for n in 0..steps {
            let t = n as f32 * DT;
            // Response amplitude drifts heavily from cycle to cycle.
            let drift = 1.0 + 0.8 * (0.35 * t).sin();
            let target = 10.0 * (omega * t).sin();
            let measured = drift * 10.0 * (omega * t - 0.5).sin();
            estimator.update(target, measured, DT);
        }
        assert!(
            !estimator.cycles_complete(),
            "Drifting per-cycle gains should fail the stability check."
        );
    }
}
