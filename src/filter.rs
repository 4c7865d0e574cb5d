// src/filter.rs

//! # Low-Pass Filter Module
//!
//! A single-pole low-pass filter used to suppress sensor and control
//! noise on the dwell command and response signals before correlation,
//! and to shape the rate target inside the reference controller.

use crate::vehicle::{num, Number};

/// First order low-pass filter with a cutoff in Hz.
///
/// A cutoff of zero disables filtering and passes samples through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassFilter<T> {
    cutoff_hz: T,
    output: T,
    initialised: bool,
}

impl<T: Number> LowPassFilter<T> {
    /// Creates a filter with the given cutoff frequency in Hz.
    pub fn new(cutoff_hz: T) -> Self {
        LowPassFilter {
            cutoff_hz,
            output: T::zero(),
            initialised: false,
        }
    }

    /// Changes the cutoff frequency without resetting the state.
    pub fn set_cutoff(&mut self, cutoff_hz: T) {
        self.cutoff_hz = cutoff_hz;
    }

    /// Resets the filter to the given output value.
    pub fn reset(&mut self, value: T) {
        self.output = value;
        self.initialised = true;
    }

    /// Clears the filter so the next sample initialises it.
    pub fn clear(&mut self) {
        self.output = T::zero();
        self.initialised = false;
    }

    /// Applies one sample over the time step `dt` and returns the
    /// filtered output.
    pub fn apply(&mut self, sample: T, dt: T) -> T {
        if !self.initialised {
            self.output = sample;
            self.initialised = true;
            return self.output;
        }
        if self.cutoff_hz <= T::zero() || dt <= T::zero() {
            self.output = sample;
            return self.output;
        }
        let rc = T::one() / (num::<T>(core::f32::consts::TAU) * self.cutoff_hz);
        let alpha = dt / (dt + rc);
        self.output = self.output + alpha * (sample - self.output);
        self.output
    }
}
