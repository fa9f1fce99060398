#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! CLI entrypoint for the beam alignment system.
//!
//! Responsibilities:
//! - Parse config/flags and assemble the simulated line and core components
//! - Initialize tracing and manage log sinks
//! - Offer `--json` mode emitting stable JSON lines to stdout (logs to stderr)
//! - Map domain error kinds to stable exit codes

mod align;
mod cli;
mod error_fmt;
mod tracing_setup;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use serde_json::json;

use beamwalk_config::{Config, load_goal_table};
use cli::{Cli, Commands, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use tracing_setup::init_tracing;

fn main() -> eyre::Result<()> {
    // Initialize pretty error reports early
    let _ = color_eyre::install();

    // Set up graceful shutdown handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived shutdown signal, stopping at the next checkpoint...");
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Failed to set signal handler: {e}");
    }

    if let Err(e) = real_main(shutdown) {
        let json = *JSON_MODE.get().unwrap_or(&false);
        let code = exit_code_for_error(&e);
        if json {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(code);
    }
    Ok(())
}

fn real_main(shutdown: Arc<AtomicBool>) -> eyre::Result<()> {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    // 1) Load typed config from TOML
    let cfg_text = fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {:?}", cli.config))?;
    let mut cfg: Config =
        toml::from_str(&cfg_text).wrap_err_with(|| format!("parse config {:?}", cli.config))?;

    // Validate configuration with clear errors
    cfg.validate()
        .wrap_err(beamwalk_core::BuildError::InvalidConfig(
            "configuration failed validation",
        ))?;

    let _log_guard = init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    match cli.cmd {
        Commands::Align {
            max_walks,
            timeout_s,
            goal_table,
            recover,
        } => {
            if let Some(path) = &goal_table {
                let rows = load_goal_table(path)
                    .wrap_err_with(|| format!("parse goal table {path:?}"))?;
                cfg.apply_goal_table(&rows)?;
            }
            if max_walks.is_some() {
                cfg.run.max_walks = max_walks;
            }
            if timeout_s.is_some() {
                cfg.run.timeout_s = timeout_s;
            }

            let t0 = std::time::Instant::now();
            let summary = align::run_align(&cfg, recover, shutdown)?;
            let duration_ms = t0.elapsed().as_millis() as u64;

            if cli.json {
                use std::time::{SystemTime, UNIX_EPOCH};
                let ts_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                let obj = json!({
                    "timestamp": ts_ms,
                    "aligned": summary.aligned,
                    "goals": summary.goals,
                    "centroids": summary.centroids,
                    "positions": summary.positions,
                    "walks": summary.walks,
                    "imager_cycles": summary.imager_cycles,
                    "recoveries": summary.recoveries,
                    "duration_ms": duration_ms,
                });
                println!("{obj}");
            } else if summary.aligned {
                println!(
                    "aligned: centroids {:?} on goals {:?} after {} walks",
                    summary.centroids, summary.goals, summary.walks
                );
            } else {
                println!(
                    "not aligned: centroids {:?} on goals {:?}; inspect the last measurements",
                    summary.centroids, summary.goals
                );
            }
            Ok(())
        }
        Commands::Check => align::run_check(&cfg),
    }
}
