// src/excitation.rs

//! # Excitation Primitives Module
//!
//! The controlled excitation signals injected into the attitude
//! controller while tuning: bounded step twitches, sinusoidal frequency
//! dwells, and the sustained-rate feedforward test.

pub mod dwell;
pub use dwell::*;
pub mod twitch;
pub use twitch::*;

/// Progress of a running excitation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// The test is still collecting data.
    Running,
    /// The test finished and an outcome is available.
    Complete,
    /// The test tripped a safety bound and recorded no result.
    Aborted,
}
