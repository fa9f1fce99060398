#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and goal-table parsing for the alignment system.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The goal-table CSV loader enforces headers and lets operators override
//!   per-imager goals and tolerances from a spreadsheet export.
use std::path::Path;

use serde::Deserialize;

/// Goal-table CSV schema.
///
/// Expected headers:
/// imager,goal,tolerance
///
/// Example:
/// imager,goal,tolerance
/// img1,240.0,5.0
/// img2,240.0,5.0
#[derive(Debug, Deserialize, Clone)]
pub struct GoalRow {
    pub imager: String,
    pub goal: f64,
    pub tolerance: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RunCfg {
    /// Fractional target inflation on downstream pairs; >= -1.
    pub overshoot: f64,
    /// Outer-loop pass budget; absent means keep going.
    pub max_walks: Option<usize>,
    /// Wall-clock budget in seconds.
    pub timeout_s: Option<f64>,
    /// Minimum accepted samples per measurement.
    pub min_valid: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterBound {
    pub field: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PairCfg {
    /// Imager name; used to match goal-table rows.
    pub name: Option<String>,
    pub goal: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_first_step")]
    pub first_step: f64,
    pub gradient: Option<f64>,
    pub start: Option<f64>,
    #[serde(default = "default_average")]
    pub average: usize,
    pub tol_scaling: Option<f64>,
    #[serde(default = "default_detector_field")]
    pub detector_field: String,
    #[serde(default = "default_motor_field")]
    pub motor_field: String,
    #[serde(default)]
    pub filters: Vec<FilterBound>,
}

fn default_tolerance() -> f64 {
    20.0
}
fn default_first_step() -> f64 {
    1.0
}
fn default_average() -> usize {
    1
}
fn default_detector_field() -> String {
    "centroid_x".to_string()
}
fn default_motor_field() -> String {
    "pitch".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Simulated beamline parameters used when no transport layer is wired in.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    /// weights[j][i]: centroid response of imager j to mirror i.
    pub weights: Vec<Vec<f64>>,
    /// Per-mirror pitch baselines.
    pub baselines: Vec<f64>,
    /// Per-imager centroid offsets at baseline pitch.
    pub offsets: Vec<f64>,
    /// Initial pitch of each mirror.
    pub starts: Vec<f64>,
    /// Optional nominal (resting) pitch of each mirror.
    pub nominals: Vec<f64>,
    /// Imager pixel count; centroids clamp to [0, pixels].
    pub pixels: Option<f64>,
    /// Pitch travel limits [low, high] shared by every mirror; required for
    /// threshold recovery scans.
    pub limits: Option<Vec<f64>>,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            weights: vec![vec![-8000.0, 0.0], vec![1500.0, 64000.0]],
            baselines: vec![0.0, 0.0],
            offsets: vec![300.0, 300.0],
            starts: vec![0.0, 0.0],
            nominals: Vec::new(),
            pixels: None,
            limits: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunCfg,
    pub pairs: Vec<PairCfg>,
    #[serde(default)]
    pub logging: Logging,
    /// Absent means the default two-mirror demo line (two pairs only).
    pub sim: Option<SimCfg>,
}

impl Config {
    pub fn from_toml(text: &str) -> eyre::Result<Self> {
        let cfg: Config = toml::from_str(text)?;
        Ok(cfg)
    }

    /// Validate ranges and cross-field consistency with clear messages.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.pairs.is_empty() {
            eyre::bail!("at least one [[pairs]] entry is required");
        }
        for (i, p) in self.pairs.iter().enumerate() {
            if p.tolerance <= 0.0 {
                eyre::bail!("pairs[{i}]: tolerance must be > 0");
            }
            if p.average == 0 {
                eyre::bail!("pairs[{i}]: average must be >= 1");
            }
            if let Some(k) = p.tol_scaling
                && k <= 0.0
            {
                eyre::bail!("pairs[{i}]: tol_scaling must be > 0");
            }
            if !p.goal.is_finite() {
                eyre::bail!("pairs[{i}]: goal must be finite");
            }
            for (j, f) in p.filters.iter().enumerate() {
                if f.min.is_none() && f.max.is_none() {
                    eyre::bail!("pairs[{i}].filters[{j}]: needs min and/or max");
                }
                if let (Some(lo), Some(hi)) = (f.min, f.max)
                    && lo > hi
                {
                    eyre::bail!("pairs[{i}].filters[{j}]: min exceeds max");
                }
            }
        }
        if self.run.overshoot < -1.0 {
            eyre::bail!("run.overshoot must be >= -1");
        }
        if let Some(t) = self.run.timeout_s
            && t <= 0.0
        {
            eyre::bail!("run.timeout_s must be > 0");
        }
        if self.run.min_valid == Some(0) {
            eyre::bail!("run.min_valid must be >= 1");
        }

        if let Some(sim) = &self.sim {
            let num = self.pairs.len();
            if sim.weights.len() != num {
                eyre::bail!("sim.weights must have one row per pair");
            }
            if sim.weights.iter().any(|row| row.len() != num) {
                eyre::bail!("sim.weights rows must have one entry per mirror");
            }
            for (name, list) in [
                ("sim.baselines", &sim.baselines),
                ("sim.offsets", &sim.offsets),
                ("sim.starts", &sim.starts),
            ] {
                if list.len() != num {
                    eyre::bail!("{name} must have one entry per pair");
                }
            }
            if !sim.nominals.is_empty() && sim.nominals.len() != num {
                eyre::bail!("sim.nominals must be empty or one entry per pair");
            }
            if let Some(limits) = &sim.limits {
                if limits.len() != 2 || limits[0] >= limits[1] {
                    eyre::bail!("sim.limits must be [low, high] with low < high");
                }
            }
        }
        Ok(())
    }

    /// Override goals/tolerances from an operator goal table; rows are
    /// matched to pairs by imager name.
    pub fn apply_goal_table(&mut self, rows: &[GoalRow]) -> eyre::Result<()> {
        for row in rows {
            let pair = self
                .pairs
                .iter_mut()
                .find(|p| p.name.as_deref() == Some(row.imager.as_str()))
                .ok_or_else(|| eyre::eyre!("goal table names unknown imager {}", row.imager))?;
            pair.goal = row.goal;
            pair.tolerance = row.tolerance;
        }
        Ok(())
    }
}

/// Load a goal table CSV, enforcing the `imager,goal,tolerance` headers.
pub fn load_goal_table(path: impl AsRef<Path>) -> eyre::Result<Vec<GoalRow>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| eyre::eyre!("open goal table {:?}: {e}", path.as_ref()))?;
    let headers = reader.headers()?;
    let expected = ["imager", "goal", "tolerance"];
    let got: Vec<&str> = headers.iter().collect();
    if got != expected {
        eyre::bail!("goal table CSV must have headers 'imager,goal,tolerance', found {got:?}");
    }
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: GoalRow = record?;
        if !row.goal.is_finite() || !row.tolerance.is_finite() || row.tolerance <= 0.0 {
            eyre::bail!("goal table row for {} is out of range", row.imager);
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_defaults() {
        let cfg = Config::from_toml(
            r#"
            [[pairs]]
            goal = 240.0
            [[pairs]]
            goal = 240.0
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.pairs[0].tolerance, 20.0);
        assert_eq!(cfg.pairs[0].average, 1);
        assert_eq!(cfg.pairs[1].detector_field, "centroid_x");
        assert_eq!(cfg.run.overshoot, 0.0);
    }
}
