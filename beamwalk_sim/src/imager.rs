//! Simulated profile imager.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beamwalk_traits::{
    Complete, DeviceError, ImagerMotor, InsertState, Readable, Reading, Status,
};
use tracing::trace;

use crate::PitchBus;
use crate::error::SimError;

/// Injectable measurement faults, consumed one per read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Read normally; spacer for scheduling a fault at the Nth read.
    Pass,
    /// Report NaN for the centroid (beam off the screen, bad image).
    Nan,
    /// Fail the read outright.
    Error,
}

/// Handle for queueing faults into a [`SimImager`] mid-test.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan(Arc<Mutex<VecDeque<Fault>>>);

impl FaultPlan {
    pub fn inject(&self, fault: Fault, count: usize) {
        if let Ok(mut q) = self.0.lock() {
            q.extend(std::iter::repeat_n(fault, count));
        }
    }

    fn pop(&self) -> Option<Fault> {
        self.0.lock().ok().and_then(|mut q| q.pop_front())
    }

    pub fn pending(&self) -> usize {
        self.0.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Status whose wait never succeeds; models an imager stuck between states.
struct StuckStatus {
    name: String,
}

impl Status for StuckStatus {
    fn wait(&mut self, _timeout: Option<Duration>) -> Result<(), DeviceError> {
        Err(Box::new(SimError::InsertionStuck {
            device: self.name.clone(),
        }))
    }

    fn done(&self) -> bool {
        false
    }
}

/// An imager whose centroid is a linear combination of all mirror pitches:
/// centroid = offset + Σ weights[i]·(pitch[i] − baselines[i]).
///
/// The centroid is only physical while the imager is IN; any other state
/// reads NaN so the usual filters can reject it. An `intensity` field goes
/// to 1.0 while the beam lands on the chip, which gives recovery scans a
/// threshold signal.
pub struct SimImager {
    name: String,
    bus: PitchBus,
    weights: Vec<f64>,
    baselines: Vec<f64>,
    offset: f64,
    pixels: Option<f64>,
    state: InsertState,
    faults: FaultPlan,
    stuck: bool,
    #[cfg(feature = "noise")]
    noise_sigma: f64,
}

impl SimImager {
    pub fn new(
        name: impl Into<String>,
        bus: PitchBus,
        weights: Vec<f64>,
        baselines: Vec<f64>,
        offset: f64,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            weights,
            baselines,
            offset,
            pixels: None,
            state: InsertState::Out,
            faults: FaultPlan::default(),
            stuck: false,
            #[cfg(feature = "noise")]
            noise_sigma: 0.0,
        }
    }

    /// Clamp the centroid to [0, pixels].
    pub fn with_pixels(mut self, pixels: f64) -> Self {
        self.pixels = Some(pixels);
        self
    }

    /// Make every insertion command hang until its wait times out.
    pub fn with_stuck_insertion(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Gaussian jitter added to every centroid sample.
    #[cfg(feature = "noise")]
    pub fn with_noise(mut self, sigma: f64) -> Self {
        self.noise_sigma = sigma;
        self
    }

    pub fn fault_plan(&self) -> FaultPlan {
        self.faults.clone()
    }

    /// The noiseless, unclamped centroid the optics put on this screen.
    pub fn ideal_centroid(&self) -> f64 {
        self.weights
            .iter()
            .enumerate()
            .fold(self.offset, |acc, (i, w)| {
                let baseline = self.baselines.get(i).copied().unwrap_or(0.0);
                acc + w * (self.bus.get(i) - baseline)
            })
    }

    fn measured_centroid(&self) -> f64 {
        if self.state != InsertState::In {
            return f64::NAN;
        }
        #[allow(unused_mut)]
        let mut c = self.ideal_centroid();
        #[cfg(feature = "noise")]
        if self.noise_sigma > 0.0 {
            use rand_distr::Distribution;
            if let Ok(normal) = rand_distr::Normal::new(0.0, self.noise_sigma) {
                c += normal.sample(&mut rand::thread_rng());
            }
        }
        match self.pixels {
            Some(px) => c.clamp(0.0, px),
            None => c,
        }
    }

    fn intensity(&self) -> f64 {
        if self.state != InsertState::In {
            return 0.0;
        }
        let c = self.ideal_centroid();
        let on_chip = match self.pixels {
            Some(px) => (0.0..=px).contains(&c),
            None => c.is_finite(),
        };
        if on_chip { 1.0 } else { 0.0 }
    }
}

impl Readable for SimImager {
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }

    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        let centroid = match self.faults.pop() {
            Some(Fault::Error) => {
                return Err(Box::new(SimError::AcquisitionFailed {
                    device: self.name.clone(),
                }));
            }
            Some(Fault::Nan) => f64::NAN,
            Some(Fault::Pass) | None => self.measured_centroid(),
        };
        trace!(imager = %self.name, centroid, "image");
        Ok([
            ("centroid_x".to_string(), Reading::now(centroid)),
            ("intensity".to_string(), Reading::now(self.intensity())),
        ]
        .into_iter()
        .collect())
    }

    fn describe(&self) -> Vec<String> {
        vec!["centroid_x".to_string(), "intensity".to_string()]
    }
}

impl ImagerMotor for SimImager {
    fn state(&self) -> InsertState {
        self.state
    }

    fn set_state(&mut self, state: InsertState) -> Result<Box<dyn Status>, DeviceError> {
        if self.stuck {
            return Ok(Box::new(StuckStatus {
                name: self.name.clone(),
            }));
        }
        self.state = state;
        Ok(Box::new(Complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imager() -> SimImager {
        let bus = PitchBus::new(vec![0.0]);
        SimImager::new("img1", bus, vec![-8000.0], vec![0.0], 300.0)
    }

    #[test]
    fn out_reads_nan_and_zero_intensity() {
        let mut img = imager();
        let doc = img.read().unwrap();
        assert!(doc["centroid_x"].value.is_nan());
        assert_eq!(doc["intensity"].value, 0.0);
    }

    #[test]
    fn inserted_reads_the_ideal_centroid() {
        let mut img = imager();
        let _ = img.set_state(InsertState::In).unwrap();
        assert_eq!(img.read().unwrap()["centroid_x"].value, 300.0);
    }

    #[test]
    fn faults_are_consumed_in_order() {
        let mut img = imager();
        let _ = img.set_state(InsertState::In).unwrap();
        let plan = img.fault_plan();
        plan.inject(Fault::Nan, 1);
        plan.inject(Fault::Error, 1);
        assert!(img.read().unwrap()["centroid_x"].value.is_nan());
        assert!(img.read().is_err());
        assert_eq!(img.read().unwrap()["centroid_x"].value, 300.0);
        assert_eq!(plan.pending(), 0);
    }

    #[test]
    fn saturation_clamps_to_the_chip() {
        let bus = PitchBus::new(vec![1.0]);
        let mut img = SimImager::new("img1", bus, vec![-8000.0], vec![0.0], 300.0)
            .with_pixels(1024.0);
        let _ = img.set_state(InsertState::In).unwrap();
        let doc = img.read().unwrap();
        assert_eq!(doc["centroid_x"].value, 0.0);
        assert_eq!(doc["intensity"].value, 0.0);
    }

    #[test]
    fn stuck_insertion_never_settles() {
        let mut img = imager().with_stuck_insertion();
        let mut status = img.set_state(InsertState::In).unwrap();
        assert!(!status.done());
        assert!(status.wait(Some(Duration::from_millis(1))).is_err());
    }

    #[test]
    fn diode_state_is_not_a_valid_measurement() {
        let mut img = imager();
        let _ = img.set_state(InsertState::Diode).unwrap();
        assert!(img.read().unwrap()["centroid_x"].value.is_nan());
    }
}
