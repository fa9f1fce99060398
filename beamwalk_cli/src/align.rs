//! Wiring: config -> simulated line -> coordinator -> orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::WrapErr;

use beamwalk_config::{Config, SimCfg};
use beamwalk_core::{
    Beamline, IterWalk, RecoveryContext, RecoveryPlan, SourceRef, ThresholdRecovery, settings,
};
use beamwalk_sim::SimBeamline;

/// What the run produced, for both the human and JSON outputs.
#[derive(Debug)]
pub struct AlignSummary {
    pub aligned: bool,
    pub goals: Vec<f64>,
    pub centroids: Vec<f64>,
    pub positions: Vec<f64>,
    pub walks: usize,
    pub imager_cycles: usize,
    pub recoveries: usize,
}

fn build_line(sim: &SimCfg) -> SimBeamline {
    let mut builder = SimBeamline::builder();
    for (weights, offset) in sim.weights.iter().zip(sim.offsets.iter()) {
        builder = builder.imager(weights.clone(), *offset);
    }
    builder = builder
        .baselines(sim.baselines.clone())
        .starts(sim.starts.clone());
    if !sim.nominals.is_empty() {
        builder = builder.nominals(sim.nominals.clone());
    }
    if let Some(px) = sim.pixels {
        builder = builder.pixels(px);
    }
    if let Some(limits) = &sim.limits {
        builder = builder.limits(limits[0], limits[1]);
    }
    builder.build()
}

/// A per-pair threshold recovery, dispatched on the starving pair's index.
struct IndexedRecovery {
    plans: Vec<ThresholdRecovery>,
}

impl RecoveryPlan for IndexedRecovery {
    fn attempt(
        &mut self,
        bl: &mut Beamline,
        ctx: &RecoveryContext,
    ) -> beamwalk_core::Result<bool> {
        match self.plans.get_mut(ctx.index) {
            Some(plan) => plan.attempt(bl, ctx),
            None => Ok(false),
        }
    }
}

pub fn run_align(
    cfg: &Config,
    recover: bool,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<AlignSummary> {
    let default_sim = SimCfg::default();
    let sim = match &cfg.sim {
        Some(sim) => sim,
        None if cfg.pairs.len() == 2 => &default_sim,
        None => {
            eyre::bail!("a [sim] section is required for lines with other than two pairs")
        }
    };
    let line = build_line(sim);

    let mut builder = Beamline::builder().on_abort(move || shutdown.load(Ordering::SeqCst));
    for (imager, mirror) in line.imagers.into_iter().zip(line.mirrors) {
        builder = builder.add_pair(imager, mirror);
    }
    let mut beamline = builder.build().wrap_err("assemble beamline")?;

    let walk_cfg = settings::iterwalk_config(cfg).wrap_err("build run config")?;
    let num = walk_cfg.goals.len();
    let goals = walk_cfg.goals.clone();
    let mut walker = IterWalk::new(walk_cfg);

    tracing::info!(pairs = num, ?goals, "alignment starting");
    if recover {
        let plans = (0..num)
            .map(|i| {
                ThresholdRecovery::new(SourceRef::Imager(i), "intensity", i)
                    .threshold(0.5)
                    .direction(1)
            })
            .collect();
        let mut recovery = IndexedRecovery { plans };
        walker.run_with_recovery(&mut beamline, &mut recovery)?;
    } else {
        walker.run(&mut beamline)?;
    }

    Ok(AlignSummary {
        aligned: walker.all_finished(),
        goals,
        centroids: walker
            .pairs()
            .iter()
            .map(|p| p.last_centroid.unwrap_or(f64::NAN))
            .collect(),
        positions: (0..num).map(|i| beamline.motor_position(i)).collect(),
        walks: walker.counters().0,
        imager_cycles: walker.counters().1,
        recoveries: walker.counters().2,
    })
}

/// Probe every configured device once and report what answered.
pub fn run_check(cfg: &Config) -> eyre::Result<()> {
    let default_sim = SimCfg::default();
    let sim = cfg.sim.as_ref().unwrap_or(&default_sim);
    let line = build_line(sim);
    let mut builder = Beamline::builder();
    let num = line.imagers.len();
    for (imager, mirror) in line.imagers.into_iter().zip(line.mirrors) {
        builder = builder.add_pair(imager, mirror);
    }
    let mut beamline = builder.build()?;

    let mut all_ok = true;
    for i in 0..num {
        beamline.set_imager(i, beamwalk_traits::InsertState::In, None)?;
        match beamline.trigger_and_read(&[SourceRef::Imager(i), SourceRef::Motor(i)]) {
            Ok(doc) => {
                println!(
                    "✓ {}: {} fields, motor at {:.6}",
                    beamline.imager_name(i),
                    doc.len(),
                    beamline.motor_position(i)
                );
            }
            Err(e) => {
                eprintln!("✗ {}: {e}", beamline.imager_name(i));
                all_ok = false;
            }
        }
    }
    if all_ok {
        println!("\nHealth check: OK");
        Ok(())
    } else {
        Err(eyre::eyre!("health check failed"))
    }
}
