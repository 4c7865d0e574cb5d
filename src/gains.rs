// src/gains.rs

//! # Gain Store Module
//!
//! Holds the four named gain sets used during a tuning session: the
//! original gains captured before any mutation, the candidate gains
//! under test, the softened intra-test gains used while returning to
//! level, and the tuned gains produced by completed axes.
//! [`GainStore::load_gains`] is the single mutator of the live attitude
//! controller; everything else selects a [`GainType`].

use crate::vehicle::{Axis, AttitudeControl, Number, VehicleAdapter};

/// Identifies which gain set is loaded into the live controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GainType {
    /// Gains the vehicle flew in with.
    Original = 0,
    /// Candidate gains for the current test.
    Test = 1,
    /// Softened gains used between tests while levelling.
    IntraTest = 2,
    /// Gains found by the last successful tune.
    Tuned = 3,
}

/// Attitude-control gains of a single axis.
///
/// `rate_filt` is the rate target low-pass cutoff in Hz; on yaw this is
/// the quantity tuned in place of rate D.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisGains<T> {
    /// Rate loop proportional gain.
    pub rate_p: T,
    /// Rate loop integral gain.
    pub rate_i: T,
    /// Rate loop derivative gain.
    pub rate_d: T,
    /// Rate loop feedforward gain.
    pub rate_ff: T,
    /// Rate target filter cutoff in Hz.
    pub rate_filt: T,
    /// Angle loop proportional gain.
    pub angle_p: T,
    /// Maximum angular acceleration in deg/s^2, zero to disable.
    pub accel_max: T,
}

impl<T: Number> AxisGains<T> {
    /// Gains with every term zero.
    pub fn zeroed() -> Self {
        AxisGains {
            rate_p: T::zero(),
            rate_i: T::zero(),
            rate_d: T::zero(),
            rate_ff: T::zero(),
            rate_filt: T::zero(),
            angle_p: T::zero(),
            accel_max: T::zero(),
        }
    }
}

/// The four named gain sets of a tuning session.
///
/// All sets cover all three axes; the state machine only mutates the
/// test set of the axis currently under tune.
#[derive(Debug, Clone)]
pub struct GainStore<T> {
    original: [AxisGains<T>; 3],
    test: [AxisGains<T>; 3],
    tuned: [AxisGains<T>; 3],
    active: GainType,
    backed_up: bool,
}

impl<T: Number> GainStore<T> {
    /// Creates an empty store with no backup taken.
    pub fn new() -> Self {
        GainStore {
            original: [AxisGains::zeroed(); 3],
            test: [AxisGains::zeroed(); 3],
            tuned: [AxisGains::zeroed(); 3],
            active: GainType::Original,
            backed_up: false,
        }
    }

    /// Snapshots the live controller gains into the original set and
    /// seeds the test and tuned sets from them.
    ///
    /// The snapshot is taken exactly once per session; repeated calls
    /// keep the first backup so a restart never overwrites the true
    /// pre-tune gains. Returns true if a fresh snapshot was taken.
    pub fn backup_and_initialise<C: AttitudeControl<T>>(&mut self, ctrl: &C) -> bool {
        if self.backed_up {
            return false;
        }
        for axis in Axis::ALL {
            let gains = ctrl.axis_gains(axis);
            self.original[axis.index()] = gains;
            self.test[axis.index()] = gains;
            self.tuned[axis.index()] = gains;
        }
        self.active = GainType::Original;
        self.backed_up = true;
        true
    }

    /// True once the original gains have been captured this session.
    pub fn backed_up(&self) -> bool {
        self.backed_up
    }

    /// Forgets the session backup so the next start re-snapshots.
    pub fn clear_backup(&mut self) {
        self.backed_up = false;
    }

    /// Gain set currently loaded into the live controller.
    pub fn active(&self) -> GainType {
        self.active
    }

    /// Writes the selected gain set into the live controller.
    ///
    /// The intra-test set is derived on the fly from the original gains
    /// with an adapter-supplied softened rate I, so the vehicle returns
    /// to level on familiar gains without integrator fights.
    pub fn load_gains<C, A>(&mut self, gain_type: GainType, ctrl: &mut C, adapter: &A)
    where
        C: AttitudeControl<T>,
        A: VehicleAdapter<T>,
    {
        for axis in Axis::ALL {
            let gains = match gain_type {
                GainType::Original => self.original[axis.index()],
                GainType::Test => self.test[axis.index()],
                GainType::Tuned => self.tuned[axis.index()],
                GainType::IntraTest => {
                    let mut gains = self.original[axis.index()];
                    gains.rate_i = adapter.intra_test_rate_i(axis, gains.rate_i);
                    gains
                }
            };
            ctrl.set_axis_gains(axis, &gains);
        }
        self.active = gain_type;
    }

    /// Original gains of one axis.
    pub fn original_gains(&self, axis: Axis) -> &AxisGains<T> {
        &self.original[axis.index()]
    }

    /// Candidate gains of one axis.
    pub fn test_gains(&self, axis: Axis) -> AxisGains<T> {
        self.test[axis.index()]
    }

    /// Replaces the candidate gains of one axis.
    pub fn set_test_gains(&mut self, axis: Axis, gains: &AxisGains<T>) {
        self.test[axis.index()] = *gains;
    }

    /// Tuned gains of one axis.
    pub fn tuned_gains(&self, axis: Axis) -> &AxisGains<T> {
        &self.tuned[axis.index()]
    }

    /// Freezes the candidate gains of a completed axis into the tuned
    /// set, filling in the adapter-derived final I and yaw D values.
    pub fn finalise_axis<A: VehicleAdapter<T>>(&mut self, axis: Axis, adapter: &A) {
        let mut gains = self.test[axis.index()];
        gains.rate_i = adapter.tuned_rate_i(axis, gains.rate_p);
        if axis == Axis::Yaw {
            gains.rate_d = adapter.tuned_yaw_rate_d();
        }
        self.tuned[axis.index()] = gains;
    }
}

impl<T: Number> Default for GainStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn store_with_backup() -> (GainStore<f32>, MockControl, MockAdapter) {
        let mut ctrl = MockControl::new();
        ctrl.set_axis_gains(Axis::Roll, &test_gains(0.15, 0.2));
        ctrl.set_axis_gains(Axis::Pitch, &test_gains(0.12, 0.18));
        ctrl.set_axis_gains(Axis::Yaw, &test_gains(0.3, 0.05));
        let mut store = GainStore::new();
        assert!(store.backup_and_initialise(&ctrl));
        (store, ctrl, MockAdapter::new())
    }

    /// Backup followed by an original load reproduces the pre-tune
    /// controller gains exactly.
    #[test]
    fn test_backup_then_load_original_round_trip() {
        let (mut store, mut ctrl, adapter) = store_with_backup();
        let before = [
            ctrl.axis_gains(Axis::Roll),
            ctrl.axis_gains(Axis::Pitch),
            ctrl.axis_gains(Axis::Yaw),
        ];

        // Perturb the live controller the way a test would.
        let mut hot = before[0];
        hot.rate_p = 1.0;
        ctrl.set_axis_gains(Axis::Roll, &hot);

        store.load_gains(GainType::Original, &mut ctrl, &adapter);
        for axis in Axis::ALL {
            assert_eq!(
                before[axis.index()],
                ctrl.axis_gains(axis),
                "Original gains should round-trip exactly."
            );
        }
    }

    /// The backup is taken once per session; later calls are ignored.
    #[test]
    fn test_backup_taken_once() {
        let (mut store, mut ctrl, _) = store_with_backup();
        let original = *store.original_gains(Axis::Roll);

        let mut hot = original;
        hot.rate_p = 9.0;
        ctrl.set_axis_gains(Axis::Roll, &hot);
        assert!(!store.backup_and_initialise(&ctrl));
        assert_eq!(original, *store.original_gains(Axis::Roll));
    }

    /// Intra-test gains are original gains with a softened rate I.
    #[test]
    fn test_intra_test_gains_soften_rate_i() {
        let (mut store, mut ctrl, adapter) = store_with_backup();
        let original = *store.original_gains(Axis::Roll);

        store.load_gains(GainType::IntraTest, &mut ctrl, &adapter);
        let loaded = ctrl.axis_gains(Axis::Roll);
        assert_eq!(GainType::IntraTest, store.active());
        assert!(value_close(original.rate_i * 0.25, loaded.rate_i));
        assert!(value_close(original.rate_p, loaded.rate_p));
    }

    /// Finalising an axis pulls the adapter's final I and yaw D values.
    #[test]
    fn test_finalise_axis_applies_adapter_values() {
        let (mut store, _ctrl, adapter) = store_with_backup();

        let mut candidate = store.test_gains(Axis::Yaw);
        candidate.rate_p = 0.4;
        candidate.rate_d = 0.01;
        store.set_test_gains(Axis::Yaw, &candidate);

        store.finalise_axis(Axis::Yaw, &adapter);
        let tuned = store.tuned_gains(Axis::Yaw);
        assert!(value_close(0.4, tuned.rate_p));
        assert!(value_close(0.4, tuned.rate_i), "Final I defaults to tuned P.");
        assert!(value_close(0.0, tuned.rate_d), "Yaw D comes from the adapter.");
    }
}
