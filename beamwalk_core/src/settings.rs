//! Bridge from the TOML schema in `beamwalk_config` to runtime configs.

use std::time::Duration;

use beamwalk_config::{Config, FilterBound};

use crate::error::Result;
use crate::filters::Filters;
use crate::iterwalk::{IterWalk, IterWalkConfig};

/// Compile declarative bound rules into a runtime filter set.
pub fn compile_filters(bounds: &[FilterBound]) -> Filters {
    bounds.iter().fold(Filters::new(), |acc, b| {
        acc.with_bounds(b.field.clone(), b.min, b.max)
    })
}

/// Build a listified run config from validated settings.
pub fn iterwalk_config(cfg: &Config) -> Result<IterWalkConfig> {
    let num = cfg.pairs.len();
    let builder = IterWalk::builder()
        .goals(cfg.pairs.iter().map(|p| p.goal).collect::<Vec<_>>())
        .first_steps(cfg.pairs.iter().map(|p| p.first_step).collect::<Vec<_>>())
        .tolerances(cfg.pairs.iter().map(|p| p.tolerance).collect::<Vec<_>>())
        .averages(cfg.pairs.iter().map(|p| p.average).collect::<Vec<_>>())
        .detector_fields(
            cfg.pairs
                .iter()
                .map(|p| p.detector_field.clone())
                .collect::<Vec<_>>(),
        )
        .motor_fields(
            cfg.pairs
                .iter()
                .map(|p| p.motor_field.clone())
                .collect::<Vec<_>>(),
        )
        .filters(
            cfg.pairs
                .iter()
                .map(|p| compile_filters(&p.filters))
                .collect(),
        )
        .overshoot(cfg.run.overshoot);

    let mut out = builder.build(num)?;
    // Per-pair optionals do not broadcast; carry them over directly.
    out.starts = cfg.pairs.iter().map(|p| p.start).collect();
    out.gradients = cfg.pairs.iter().map(|p| p.gradient).collect();
    out.tol_scaling = cfg.pairs.iter().map(|p| p.tol_scaling).collect();
    out.max_walks = cfg.run.max_walks;
    out.timeout = cfg.run.timeout_s.map(Duration::from_secs_f64);
    if let Some(min_valid) = cfg.run.min_valid {
        out.min_valid = min_valid;
    }
    Ok(out)
}
