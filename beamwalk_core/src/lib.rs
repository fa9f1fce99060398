#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core alignment logic (transport-agnostic).
//!
//! This crate drives the beam centroid on a chain of imagers to operator
//! targets using only centroid readings and mirror pitch moves. All device
//! interactions go through `beamwalk_traits` and the [`Beamline`] run
//! coordinator, which journals every dispatched command.
//!
//! ## Architecture
//!
//! - **Coordination**: device registry, command journal, group waits,
//!   checkpoint/suspend hooks (`beamline` module)
//! - **Measurement**: filtered N-shot medians (`measure`, `filters`)
//! - **Modeling**: online OLS fits of centroid vs pitch (`fit`)
//! - **Control**: the inner 1-D walk (`walk`) and the cross-coupled outer
//!   orchestrator (`iterwalk`)
//! - **Recovery**: threshold scans and operator-supplied plans (`recovery`)
//!
//! The failure taxonomy lives in `error`; everything an operator can
//! misconfigure is refused before the first device mutation.

pub mod beamline;
pub mod error;
pub mod filters;
pub mod fit;
pub mod iterwalk;
pub mod measure;
pub mod mocks;
pub mod recovery;
pub mod settings;
pub mod stream;
pub mod walk;

pub use beamline::{Beamline, BeamlineBuilder};
pub use error::{AlignError, BuildError, Result};
pub use filters::Filters;
pub use fit::{FitResult, LinearFit, PinnedPitch, TwoPitchFit, rank_models};
pub use iterwalk::{IterWalk, IterWalkBuilder, IterWalkConfig, ParamList, adaptive_tolerance};
pub use measure::{DelaySchedule, measure_average, measure_centroid};
pub use recovery::{RecoveryContext, RecoveryPlan, ThresholdRecovery};
pub use stream::{Command, Document, EventWatcher, GroupId, SetPoint, SourceRef, StartDocument};
pub use walk::{CORRELATION_FLOOR, WalkCfg, walk_to_pixel};
