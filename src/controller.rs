// src/controller.rs

//! # Reference Controller Module
//!
//! A cascaded angle and rate PID attitude controller implementing the
//! [`AttitudeControl`](crate::vehicle::AttitudeControl) surface the
//! tuner drives.  Vehicles with their own attitude controller only need
//! the trait; this one closes the loop for simulation and for airframes
//! without an existing control stack.

pub mod cascade;
pub use cascade::*;
