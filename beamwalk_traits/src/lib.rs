#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Traits that define the beamline device and time abstractions.
//!
//! - `Readable` exposes trigger/read/describe over named scalar fields.
//! - `PitchMotor` adds position readback and schedulable absolute moves.
//! - `ImagerMotor` adds the IN/OUT/DIODE insertion state machine.
//! - `clock` offers a `MonotonicClock` for deterministic timing and testability.
//!
//! Other crates depend only on these traits, enabling simulation and multiple
//! device backends while keeping `beamwalk_core` transport-agnostic.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Errors crossing the device seam are opaque to the core; the core maps them
/// to typed alignment errors at the branch points that care.
pub type DeviceError = Box<dyn std::error::Error + Send + Sync>;

/// One scalar sample of a device field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub timestamp: SystemTime,
}

impl Reading {
    pub fn now(value: f64) -> Self {
        Self {
            value,
            timestamp: SystemTime::now(),
        }
    }
}

/// Completion handle for a scheduled device action (move, insertion, trigger).
///
/// `wait` blocks until the action settles or the timeout expires; expiry and
/// device faults both surface as errors.
pub trait Status {
    fn wait(&mut self, timeout: Option<Duration>) -> Result<(), DeviceError>;

    /// Non-blocking completion check.
    fn done(&self) -> bool;
}

/// Status for devices that settle synchronously inside the scheduling call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Complete;

impl Status for Complete {
    fn wait(&mut self, _timeout: Option<Duration>) -> Result<(), DeviceError> {
        Ok(())
    }

    fn done(&self) -> bool {
        true
    }
}

/// A triggerable source of named scalar readings.
///
/// Contract: `trigger` schedules an acquisition whose status completes before
/// `read` returns the new data; `read` is non-destructive.
pub trait Readable {
    fn name(&self) -> &str;

    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError>;

    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError>;

    /// Field keys this source reports, in `read` order.
    fn describe(&self) -> Vec<String>;
}

/// A motor controlling one mirror pitch coordinate.
///
/// Contract: `position` reflects the commanded target once the move status
/// completes; a failed `set` must propagate as a motor error.
pub trait PitchMotor: Readable {
    fn position(&self) -> f64;

    /// Known-good resting pose, if the installation defines one.
    fn nominal_position(&self) -> Option<f64> {
        None
    }

    fn low_limit(&self) -> Option<f64> {
        None
    }

    fn high_limit(&self) -> Option<f64> {
        None
    }

    fn set(&mut self, target: f64) -> Result<Box<dyn Status>, DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Insertion state of a profile imager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertState {
    In,
    Out,
    Diode,
}

impl core::fmt::Display for InsertState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InsertState::In => write!(f, "IN"),
            InsertState::Out => write!(f, "OUT"),
            InsertState::Diode => write!(f, "DIODE"),
        }
    }
}

/// A removable imager. Centroid readings are meaningful only when `In`; any
/// sample produced in another state must be rejectable by filters.
pub trait ImagerMotor: Readable {
    fn state(&self) -> InsertState;

    fn set_state(&mut self, state: InsertState) -> Result<Box<dyn Status>, DeviceError>;
}

// Allow boxed trait objects to be used where a generic bound is expected.
impl<T: ?Sized + Readable> Readable for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        (**self).trigger()
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        (**self).read()
    }
    fn describe(&self) -> Vec<String> {
        (**self).describe()
    }
}

impl<T: ?Sized + PitchMotor> PitchMotor for Box<T> {
    fn position(&self) -> f64 {
        (**self).position()
    }
    fn nominal_position(&self) -> Option<f64> {
        (**self).nominal_position()
    }
    fn low_limit(&self) -> Option<f64> {
        (**self).low_limit()
    }
    fn high_limit(&self) -> Option<f64> {
        (**self).high_limit()
    }
    fn set(&mut self, target: f64) -> Result<Box<dyn Status>, DeviceError> {
        (**self).set(target)
    }
    fn stop(&mut self) -> Result<(), DeviceError> {
        (**self).stop()
    }
}

impl<T: ?Sized + ImagerMotor> ImagerMotor for Box<T> {
    fn state(&self) -> InsertState {
        (**self).state()
    }
    fn set_state(&mut self, state: InsertState) -> Result<Box<dyn Status>, DeviceError> {
        (**self).set_state(state)
    }
}
