//! Test and helper mocks for beamwalk_core.
//!
//! These are deliberately minimal; coupled multi-mirror simulations live in
//! `beamwalk_sim`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use beamwalk_traits::{
    Complete, DeviceError, ImagerMotor, InsertState, PitchMotor, Readable, Reading, Status,
};

/// A source that always errors on trigger and read.
pub struct NoopSource;

impl Readable for NoopSource {
    fn name(&self) -> &str {
        "noop"
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Err(Box::new(std::io::Error::other("noop source")))
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        Err(Box::new(std::io::Error::other("noop source")))
    }
    fn describe(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A source whose single field is produced by a closure on every read.
pub struct FnSource<F> {
    name: String,
    field: String,
    f: F,
}

impl<F: FnMut() -> f64> FnSource<F> {
    pub fn new(name: impl Into<String>, field: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            f,
        }
    }
}

impl<F: FnMut() -> f64> Readable for FnSource<F> {
    fn name(&self) -> &str {
        &self.name
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        let v = (self.f)();
        Ok([(self.field.clone(), Reading::now(v))].into_iter().collect())
    }
    fn describe(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

/// An imager with an externally settable centroid value.
pub struct TestImager {
    name: String,
    value: Arc<Mutex<f64>>,
    state: InsertState,
}

impl TestImager {
    pub fn at(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(Mutex::new(value)),
            state: InsertState::Out,
        }
    }

    /// Shared handle for mutating the reported centroid mid-test.
    pub fn value_handle(&self) -> Arc<Mutex<f64>> {
        Arc::clone(&self.value)
    }
}

impl Readable for TestImager {
    fn name(&self) -> &str {
        &self.name
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        let v = *self.value.lock().map_err(|_| "poisoned value lock")?;
        Ok([("centroid_x".to_string(), Reading::now(v))]
            .into_iter()
            .collect())
    }
    fn describe(&self) -> Vec<String> {
        vec!["centroid_x".to_string()]
    }
}

impl ImagerMotor for TestImager {
    fn state(&self) -> InsertState {
        self.state
    }
    fn set_state(&mut self, state: InsertState) -> Result<Box<dyn Status>, DeviceError> {
        self.state = state;
        Ok(Box::new(Complete))
    }
}

/// A motor that settles instantly and shares its position with the test.
pub struct TestMotor {
    name: String,
    position: Arc<Mutex<f64>>,
    nominal: Option<f64>,
    limits: (Option<f64>, Option<f64>),
}

impl TestMotor {
    pub fn at(name: impl Into<String>, position: f64) -> Self {
        Self {
            name: name.into(),
            position: Arc::new(Mutex::new(position)),
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

    pub fn position_handle(&self) -> Arc<Mutex<f64>> {
        Arc::clone(&self.position)
    }

    fn pos(&self) -> f64 {
        self.position.lock().map(|p| *p).unwrap_or(f64::NAN)
    }
}

impl Readable for TestMotor {
    fn name(&self) -> &str {
        &self.name
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        Ok([("pitch".to_string(), Reading::now(self.pos()))]
            .into_iter()
            .collect())
    }
    fn describe(&self) -> Vec<String> {
        vec!["pitch".to_string()]
    }
}

impl PitchMotor for TestMotor {
    fn position(&self) -> f64 {
        self.pos()
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
        *self.position.lock().map_err(|_| "poisoned position lock")? = target;
        Ok(Box::new(Complete))
    }
}

/// An imager whose centroid is a linear function of one or more motor
/// positions, wired up through the motors' shared position handles.
pub struct LinearImager {
    name: String,
    terms: Vec<(Arc<Mutex<f64>>, f64, f64)>,
    offset: f64,
    state: InsertState,
}

impl LinearImager {
    pub fn new(name: impl Into<String>, offset: f64) -> Self {
        Self {
            name: name.into(),
            terms: Vec::new(),
            offset,
            state: InsertState::Out,
        }
    }

    /// centroid += gradient * (position - baseline)
    pub fn coupled(mut self, position: Arc<Mutex<f64>>, gradient: f64, baseline: f64) -> Self {
        self.terms.push((position, gradient, baseline));
        self
    }

    fn centroid(&self) -> f64 {
        self.terms.iter().fold(self.offset, |acc, (pos, g, base)| {
            let p = pos.lock().map(|p| *p).unwrap_or(f64::NAN);
            acc + g * (p - base)
        })
    }
}

impl Readable for LinearImager {
    fn name(&self) -> &str {
        &self.name
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        Ok([("centroid_x".to_string(), Reading::now(self.centroid()))]
            .into_iter()
            .collect())
    }
    fn describe(&self) -> Vec<String> {
        vec!["centroid_x".to_string()]
    }
}

impl ImagerMotor for LinearImager {
    fn state(&self) -> InsertState {
        self.state
    }
    fn set_state(&mut self, state: InsertState) -> Result<Box<dyn Status>, DeviceError> {
        self.state = state;
        Ok(Box::new(Complete))
    }
}

/// An imager whose centroid is computed by an arbitrary closure; handy for
/// deadbands, saturation, and other non-linear responses in tests.
pub struct ClosureImager<F> {
    name: String,
    f: F,
    state: InsertState,
}

impl<F: Fn() -> f64> ClosureImager<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            state: InsertState::Out,
        }
    }
}

impl<F: Fn() -> f64> Readable for ClosureImager<F> {
    fn name(&self) -> &str {
        &self.name
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        Ok(Box::new(Complete))
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        Ok([("centroid_x".to_string(), Reading::now((self.f)()))]
            .into_iter()
            .collect())
    }
    fn describe(&self) -> Vec<String> {
        vec!["centroid_x".to_string()]
    }
}

impl<F: Fn() -> f64> ImagerMotor for ClosureImager<F> {
    fn state(&self) -> InsertState {
        self.state
    }
    fn set_state(&mut self, state: InsertState) -> Result<Box<dyn Status>, DeviceError> {
        self.state = state;
        Ok(Box::new(Complete))
    }
}

/// A motor whose set always fails; used to exercise fatal motor faults.
pub struct FaultyMotor {
    inner: TestMotor,
}

impl FaultyMotor {
    pub fn at(name: impl Into<String>, position: f64) -> Self {
        Self {
            inner: TestMotor::at(name, position),
        }
    }
}

impl Readable for FaultyMotor {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn trigger(&mut self) -> Result<Box<dyn Status>, DeviceError> {
        self.inner.trigger()
    }
    fn read(&mut self) -> Result<BTreeMap<String, Reading>, DeviceError> {
        self.inner.read()
    }
    fn describe(&self) -> Vec<String> {
        self.inner.describe()
    }
}

impl PitchMotor for FaultyMotor {
    fn position(&self) -> f64 {
        self.inner.position()
    }
    fn set(&mut self, _target: f64) -> Result<Box<dyn Status>, DeviceError> {
        Err(Box::new(std::io::Error::other("drive fault")))
    }
}
