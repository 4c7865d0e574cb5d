// src/lib.rs

//! # Attitude Control Autotuner
//!
//! This module provides a `no_std`, no-alloc in-flight autotuner for
//! cascaded attitude controllers on multirotor-class vehicles.  While a
//! tuning flight mode is active the tuner repeatedly waits for the
//! vehicle to hold level, injects a bounded excitation (a step twitch,
//! a sinusoidal frequency dwell or a sustained-rate feedforward test),
//! and brackets one gain at a time from the measured response until
//! every selected axis is tuned.  The pilot keeps authority at all
//! times: any stick input suspends the active test and restores the
//! gains the vehicle flew in with.
//!
//! The tuner reaches the vehicle exclusively through two traits, the
//! live controller surface [`AttitudeControl`] and the vehicle
//! collaborator [`VehicleAdapter`]; both are passed in on every tick.
//! [`CascadeAttitudeControl`] is a ready-made controller for airframes
//! without an existing control stack.

#![no_std]
#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod controller;
pub mod excitation;
pub mod filter;
pub mod frequency;
pub mod gains;
pub mod level;
pub mod policy;
pub mod tune;
pub mod vehicle;

#[doc(inline)]
pub use controller::{CascadeAttitudeControl, RateLoopData};
#[doc(inline)]
pub use excitation::{DwellTest, FeedForwardTest, Progress, TwitchTest};
#[doc(inline)]
pub use filter::LowPassFilter;
#[doc(inline)]
pub use frequency::{DwellResult, FrequencyResponse, DWELL_CYCLES};
#[doc(inline)]
pub use gains::{AxisGains, GainStore, GainType};
#[doc(inline)]
pub use level::{LevelIssue, LevelProblem, LevelSupervisor};
#[doc(inline)]
pub use policy::{
    GainUpdatePolicy, MaxGainData, TestOutcome, TuneType, Verdict, DEFAULT_TUNE_SEQUENCE,
    SUCCESS_COUNT,
};
#[doc(inline)]
pub use tune::{AutoTune, AutoTuneConfig, StepType, TuneMode};
#[doc(inline)]
pub use vehicle::{
    AttitudeControl, Axis, Number, TestKind, TuneEvent, TuneMessage, VehicleAdapter,
};

#[cfg(test)]
mod test_utils;
