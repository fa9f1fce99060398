//! Simulated pitch-adjustable flat mirror.

use std::collections::BTreeMap;

use beamwalk_traits::{Complete, DeviceError, PitchMotor, Readable, Reading, Status};
use tracing::trace;

use crate::PitchBus;
use crate::error::SimError;

/// A mirror pitch motor backed by the shared [`PitchBus`]. Moves settle
/// synchronously; commanding past a limit is a device error, mirroring how a
/// real controller refuses out-of-range setpoints.
pub struct SimPitch {
    name: String,
    bus: PitchBus,
    index: usize,
    nominal: Option<f64>,
    limits: (Option<f64>, Option<f64>),
}

impl SimPitch {
    pub fn new(name: impl Into<String>, bus: PitchBus, index: usize) -> Self {
        Self {
            name: name.into(),
            bus,
            index,
            nominal: None,
            limits: (None, None),
        }
    }

    pub fn with_nominal(mut self, nominal: f64) -> Self {
        self.nominal = Some(nominal);
        self
    }

    pub fn with_limits(mut self, low: f64, high: f64) -> Self {
        self.limits = (Some(low), Some(high));
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl Readable for SimPitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }

    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        Ok([("pitch".to_string(), Reading::now(self.bus.get(self.index)))]
            .into_iter()
            .collect())
    }

    fn describe(&self) -> Vec<String> {
        vec!["pitch".to_string()]
    }
}

impl PitchMotor for SimPitch {
    fn position(&self) -> f64 {
        self.bus.get(self.index)
    }

    fn nominal_position(&self) -> Option<f64> {
        self.nominal
    }

    fn low_limit(&self) -> Option<f64> {
        self.limits.0
    }

    fn high_limit(&self) -> Option<f64> {
        self.limits.1
    }

    fn set(&mut self, target: f64) -> Result<Box<dyn Status>, DeviceError> {
        let low = self.limits.0.unwrap_or(f64::NEG_INFINITY);
        let high = self.limits.1.unwrap_or(f64::INFINITY);
        if target < low || target > high {
            return Err(Box::new(SimError::OutOfRange {
                device: self.name.clone(),
                target,
                low,
                high,
            }));
        }
        trace!(mirror = %self.name, target, "pitch move");
        self.bus.set(self.index, target);
        Ok(Box::new(Complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_refuse_out_of_range_targets() {
        let bus = PitchBus::new(vec![0.0]);
        let mut m = SimPitch::new("m1", bus, 0).with_limits(-1.0, 1.0);
        assert!(m.set(2.0).is_err());
        assert!(m.set(-2.0).is_err());
        let _ = m.set(0.5).unwrap();
        assert_eq!(m.position(), 0.5);
    }

    #[test]
    fn nominal_defaults_to_none() {
        let bus = PitchBus::new(vec![0.0]);
        let m = SimPitch::new("m1", bus.clone(), 0);
        assert!(m.nominal_position().is_none());
        let m = SimPitch::new("m1", bus, 0).with_nominal(0.1);
        assert_eq!(m.nominal_position(), Some(0.1));
    }
}
