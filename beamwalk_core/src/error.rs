//! Domain and build errors for the alignment engine.
//!
//! `AlignError` kinds map one-to-one onto the failure modes the orchestrator
//! branches on; the CLI maps them to stable exit codes and JSON fields.
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AlignError {
    /// Too few samples survived the filter set. Recoverable via a recovery
    /// plan when one is configured.
    #[error("only {accepted} of {required} samples passed filters")]
    FilterCount { accepted: usize, required: usize },

    /// An imager failed to reach a commanded insertion state. Fatal.
    #[error("imager {imager} failed to reach {target} within {timeout_s}s")]
    InsertionTimeout {
        imager: String,
        target: String,
        timeout_s: u64,
    },

    /// A motor rejected or failed a commanded move. Fatal.
    #[error("motor {motor}: {reason}")]
    MotorFault { motor: String, reason: String },

    /// A walk ended outside its selected tolerance. Fatal to the run.
    #[error(
        "walk on pair {index} stopped at {centroid} (goal {goal} ± {tolerance}), motor at {position}"
    )]
    WalkFailed {
        index: usize,
        centroid: f64,
        goal: f64,
        tolerance: f64,
        position: f64,
    },

    /// Wall-clock budget exceeded; checked at each pair entry. Fatal.
    #[error("alignment timed out after {elapsed_s:.2}s")]
    GlobalTimeout { elapsed_s: f64 },

    /// A flat fit cannot be inverted for the requested target. The caller
    /// must reseed or reset.
    #[error("cannot backsolve a horizontal fit for target {target} after {points} points")]
    BacksolveUndefined { target: f64, points: usize },

    /// A model was asked for a prediction before any fit existed.
    #[error("no fit available: {0}")]
    NoFit(&'static str),

    /// Operator interrupt observed at a checkpoint.
    #[error("interrupted at checkpoint")]
    Interrupted,

    /// A recovery plan hit a device fault it could not report as ok/not-ok.
    #[error("recovery error: {0}")]
    Recovery(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing goals")]
    MissingGoals,
    #[error("argument {name} has length {got}, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("delay schedule provides {got} entries but {needed} are needed")]
    BadDelaySchedule { got: usize, needed: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
