#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Simulated beamline devices.
//!
//! A [`SimBeamline`] models the classic arrangement: flat mirrors whose
//! pitch is the only controlled coordinate, and profile imagers whose
//! centroid responds linearly to every upstream mirror. Cross-coupling,
//! insertion states, saturation, and injectable measurement faults are all
//! here so the control loops can be exercised without hardware; the optional
//! `noise` feature adds gaussian centroid jitter on top.

mod error;
mod imager;
mod mirror;

pub use error::SimError;
pub use imager::{Fault, FaultPlan, SimImager};
pub use mirror::SimPitch;

use std::sync::{Arc, Mutex};

/// Shared pitch positions connecting mirrors to the imagers they steer.
#[derive(Debug, Clone, Default)]
pub struct PitchBus(Arc<Mutex<Vec<f64>>>);

impl PitchBus {
    pub fn new(positions: Vec<f64>) -> Self {
        Self(Arc::new(Mutex::new(positions)))
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0
            .lock()
            .ok()
            .and_then(|v| v.get(index).copied())
            .unwrap_or(f64::NAN)
    }

    pub fn set(&self, index: usize, value: f64) {
        if let Ok(mut v) = self.0.lock()
            && let Some(slot) = v.get_mut(index)
        {
            *slot = value;
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully wired simulated line plus the handles tests poke at.
pub struct SimBeamline {
    pub mirrors: Vec<SimPitch>,
    pub imagers: Vec<SimImager>,
    pub bus: PitchBus,
    pub faults: Vec<FaultPlan>,
}

/// Builder for a coupled n-mirror/n-imager line.
pub struct SimBeamlineBuilder {
    weights: Vec<Vec<f64>>,
    baselines: Vec<f64>,
    offsets: Vec<f64>,
    starts: Vec<f64>,
    nominals: Vec<Option<f64>>,
    limits: Option<(f64, f64)>,
    pixels: Option<f64>,
}

impl SimBeamline {
    pub fn builder() -> SimBeamlineBuilder {
        SimBeamlineBuilder {
            weights: Vec::new(),
            baselines: Vec::new(),
            offsets: Vec::new(),
            starts: Vec::new(),
            nominals: Vec::new(),
            limits: None,
            pixels: None,
        }
    }

    /// The canonical two-flat-mirror, two-imager system: the first imager
    /// sees only the first mirror, the second sees both.
    pub fn classic_two_mirror() -> SimBeamline {
        Self::builder()
            .imager(vec![-8000.0, 0.0], 300.0)
            .imager(vec![1500.0, 64000.0], 300.0)
            .starts(vec![0.0, 0.0])
            .build()
    }

    /// A pathological line where both mirrors move both imagers identically;
    /// no walk sequence can converge.
    pub fn underdetermined_two_mirror() -> SimBeamline {
        Self::builder()
            .imager(vec![10000.0, 10000.0], 300.0)
            .imager(vec![10000.0, 10000.0], 500.0)
            .starts(vec![0.0, 0.0])
            .build()
    }
}

impl SimBeamlineBuilder {
    /// Add one imager with its per-mirror response weights and the centroid
    /// reported when every mirror sits at its baseline.
    pub fn imager(mut self, weights: Vec<f64>, offset: f64) -> Self {
        self.weights.push(weights);
        self.offsets.push(offset);
        self
    }

    pub fn baselines(mut self, baselines: Vec<f64>) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn starts(mut self, starts: Vec<f64>) -> Self {
        self.starts = starts;
        self
    }

    pub fn nominals(mut self, nominals: Vec<f64>) -> Self {
        self.nominals = nominals.into_iter().map(Some).collect();
        self
    }

    pub fn limits(mut self, low: f64, high: f64) -> Self {
        self.limits = Some((low, high));
        self
    }

    /// Clamp centroids to [0, pixels], like a real camera chip.
    pub fn pixels(mut self, pixels: f64) -> Self {
        self.pixels = Some(pixels);
        self
    }

    pub fn build(self) -> SimBeamline {
        let n = self.weights.len();
        let starts = if self.starts.len() == n {
            self.starts
        } else {
            vec![0.0; n]
        };
        let baselines = if self.baselines.len() == n {
            self.baselines
        } else {
            vec![0.0; n]
        };
        let bus = PitchBus::new(starts);

        let mirrors: Vec<SimPitch> = (0..n)
            .map(|i| {
                let mut m = SimPitch::new(format!("m{}", i + 1), bus.clone(), i);
                if let Some(nominal) = self.nominals.get(i).copied().flatten() {
                    m = m.with_nominal(nominal);
                }
                if let Some((lo, hi)) = self.limits {
                    m = m.with_limits(lo, hi);
                }
                m
            })
            .collect();

        let mut faults = Vec::with_capacity(n);
        let imagers: Vec<SimImager> = self
            .weights
            .into_iter()
            .zip(self.offsets)
            .enumerate()
            .map(|(j, (weights, offset))| {
                let mut img = SimImager::new(
                    format!("img{}", j + 1),
                    bus.clone(),
                    weights,
                    baselines.clone(),
                    offset,
                );
                if let Some(px) = self.pixels {
                    img = img.with_pixels(px);
                }
                faults.push(img.fault_plan());
                img
            })
            .collect();

        SimBeamline {
            mirrors,
            imagers,
            bus,
            faults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamwalk_traits::{ImagerMotor, InsertState, PitchMotor, Readable};

    #[test]
    fn classic_line_couples_downstream_only() {
        let mut line = SimBeamline::classic_two_mirror();
        for img in &mut line.imagers {
            let _ = img.set_state(InsertState::In).unwrap();
        }
        let read = |img: &mut SimImager| img.read().unwrap()["centroid_x"].value;

        assert_eq!(read(&mut line.imagers[0]), 300.0);
        assert_eq!(read(&mut line.imagers[1]), 300.0);

        line.bus.set(0, 0.001);
        assert_eq!(read(&mut line.imagers[0]), 300.0 - 8.0);
        assert_eq!(read(&mut line.imagers[1]), 300.0 + 1.5);

        line.bus.set(1, 0.001);
        // The first imager is upstream of the second mirror.
        assert_eq!(read(&mut line.imagers[0]), 300.0 - 8.0);
        assert_eq!(read(&mut line.imagers[1]), 300.0 + 1.5 + 64.0);
    }

    #[test]
    fn mirror_set_moves_the_bus() {
        let line = SimBeamline::classic_two_mirror();
        let mut m = SimPitch::new("probe", line.bus.clone(), 0);
        let _ = m.set(0.25).unwrap();
        assert_eq!(line.bus.get(0), 0.25);
        assert_eq!(m.position(), 0.25);
    }
}
