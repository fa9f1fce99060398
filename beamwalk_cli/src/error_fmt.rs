//! Human-readable error descriptions and structured JSON error formatting.

use beamwalk_core::{AlignError, BuildError};

/// Map an eyre::Report to a human-readable explanation with likely causes
/// and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingGoals => {
                "What happened: No goal pixels were provided.\nLikely causes: The config has no [[pairs]] goals or the builder was never given goals.\nHow to fix: Add a goal to every [[pairs]] entry.".to_string()
            }
            BuildError::LengthMismatch { name, got, expected } => format!(
                "What happened: The per-pair argument '{name}' has {got} entries but the line has {expected} pairs.\nLikely causes: A list in the config was edited without updating the others.\nHow to fix: Give '{name}' one entry per pair, or a single value to broadcast."
            ),
            BuildError::BadDelaySchedule { got, needed } => format!(
                "What happened: The delay list provides {got} entries but {needed} inter-sample gaps are needed.\nHow to fix: Extend the delay list or use a single scalar delay."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<AlignError>() {
        return match ae {
            AlignError::FilterCount { accepted, required } => format!(
                "What happened: Only {accepted} of the required {required} samples passed the filters.\nLikely causes: No beam on the imager, a screen left OUT, or filters tuned too tight.\nHow to fix: Check beam presence and imager insertion, loosen the filter bounds, or configure a recovery plan (--recover)."
            ),
            AlignError::InsertionTimeout { imager, target, .. } => format!(
                "What happened: Imager {imager} never reported {target}.\nLikely causes: A stuck actuator or a dead state readback.\nHow to fix: Inspect the imager drive, then rerun."
            ),
            AlignError::MotorFault { motor, reason } => format!(
                "What happened: Mirror motor {motor} faulted ({reason}).\nLikely causes: A refused setpoint (limits) or a drive fault.\nHow to fix: Check the motor limits and drive state."
            ),
            AlignError::WalkFailed { index, centroid, goal, tolerance, position } => format!(
                "What happened: The walk on pair {index} stalled at {centroid} with the goal at {goal} ± {tolerance} (motor at {position}).\nLikely causes: Too few walk steps for the coupling, or a non-linear response.\nHow to fix: Seed a gradient, loosen tol_scaling, or widen the tolerance."
            ),
            AlignError::GlobalTimeout { elapsed_s } => format!(
                "What happened: The alignment ran out of wall-clock budget after {elapsed_s:.1}s.\nHow to fix: Raise run.timeout_s or reduce averaging."
            ),
            AlignError::Interrupted => {
                "What happened: The run was interrupted at a checkpoint.\nLikely causes: Ctrl-C.".to_string()
            }
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {err}"
    )
}

/// Map error kinds to stable exit codes; unknown errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    if let Some(ae) = err.downcast_ref::<AlignError>() {
        return match ae {
            AlignError::FilterCount { .. } => 3,
            AlignError::WalkFailed { .. } => 4,
            AlignError::GlobalTimeout { .. } => 5,
            AlignError::InsertionTimeout { .. } | AlignError::MotorFault { .. } => 6,
            AlignError::Interrupted => 7,
            _ => 1,
        };
    }
    1
}

fn error_kind(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Config";
    }
    match err.downcast_ref::<AlignError>() {
        Some(AlignError::FilterCount { .. }) => "FilterCount",
        Some(AlignError::InsertionTimeout { .. }) => "InsertionTimeout",
        Some(AlignError::MotorFault { .. }) => "MotorFault",
        Some(AlignError::WalkFailed { .. }) => "WalkFailed",
        Some(AlignError::GlobalTimeout { .. }) => "GlobalTimeout",
        Some(AlignError::Interrupted) => "Interrupted",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({
        "reason": error_kind(err),
        "message": humanize(err),
    });
    if let Some(AlignError::WalkFailed {
        index,
        centroid,
        goal,
        tolerance,
        position,
    }) = err.downcast_ref::<AlignError>()
    {
        obj["details"] = json!({
            "index": index,
            "centroid": centroid,
            "goal": goal,
            "tolerance": tolerance,
            "position": position,
        });
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let filter: eyre::Report = AlignError::FilterCount {
            accepted: 0,
            required: 1,
        }
        .into();
        assert_eq!(exit_code_for_error(&filter), 3);

        let cfg: eyre::Report = BuildError::MissingGoals.into();
        assert_eq!(exit_code_for_error(&cfg), 2);

        let timeout: eyre::Report = AlignError::GlobalTimeout { elapsed_s: 9.0 }.into();
        assert_eq!(exit_code_for_error(&timeout), 5);
    }

    #[test]
    fn walk_failures_carry_structured_details() {
        let err: eyre::Report = AlignError::WalkFailed {
            index: 1,
            centroid: 310.0,
            goal: 240.0,
            tolerance: 5.0,
            position: 0.001,
        }
        .into();
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "WalkFailed");
        assert_eq!(v["details"]["index"], 1);
    }
}
