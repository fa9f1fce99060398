//! Typed faults for the simulated devices.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("{device}: target {target} outside travel [{low}, {high}]")]
    OutOfRange {
        device: String,
        target: f64,
        low: f64,
        high: f64,
    },
    #[error("{device}: image acquisition failed")]
    AcquisitionFailed { device: String },
    #[error("{device}: insertion did not settle")]
    InsertionStuck { device: String },
}
