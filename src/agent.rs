//! Periodic analysis agent: the daemon cycle loop.
//!
//! Each cycle runs a full analysis pass and writes a timestamped text
//! report under the configured report directory. A failing cycle is
//! logged and the loop carries on; stopping the process is the service
//! manager's call, not ours.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::analyzer::analyze_slow_attempts;
use crate::checkpoint;
use crate::config::AnalyzerConfig;
use crate::provider::RecordStore;
use crate::report::render_report;

/// Summary of the last completed cycle, checkpointed between restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub generated_at: DateTime<Utc>,
    pub n_slow_attempts: usize,
    pub report_file: PathBuf,
}

const LAST_CYCLE_CHECKPOINT: &str = "last_cycle";

/// Run one analysis cycle and write its report file.
pub fn run_cycle(
    store: &dyn RecordStore,
    config: &AnalyzerConfig,
    now: DateTime<Utc>,
) -> Result<CycleSummary> {
    let run = analyze_slow_attempts(store, config, now).context("analysis pass failed")?;

    std::fs::create_dir_all(&config.report_dir).with_context(|| {
        format!(
            "failed to create report directory {}",
            config.report_dir.display()
        )
    })?;
    let report_file = config
        .report_dir
        .join(format!("slow_tasks_{}.txt", now.format("%y%m%d_%H%M%S")));
    std::fs::write(&report_file, render_report(&run, config))
        .with_context(|| format!("failed to write report {}", report_file.display()))?;

    let summary = CycleSummary {
        generated_at: now,
        n_slow_attempts: run.attempts.len(),
        report_file,
    };
    checkpoint::save(&config.report_dir, LAST_CYCLE_CHECKPOINT, &summary)
        .context("failed to checkpoint cycle summary")?;
    Ok(summary)
}

/// Run analysis cycles forever (or for `cycles` iterations when given).
pub fn run_daemon(
    store: &dyn RecordStore,
    config: &AnalyzerConfig,
    cycles: Option<u64>,
) -> Result<()> {
    match checkpoint::load::<CycleSummary>(&config.report_dir, LAST_CYCLE_CHECKPOINT) {
        Ok(Some(previous)) => {
            info!(
                previous_cycle = %previous.generated_at,
                previous_report = %previous.report_file.display(),
                "resuming after earlier cycle"
            );
        }
        Ok(None) => {}
        Err(err) => {
            error!(%err, "ignoring unreadable cycle checkpoint");
        }
    }

    let mut completed = 0u64;
    loop {
        info!("start cycle");
        match run_cycle(store, config, Utc::now()) {
            Ok(summary) => {
                info!(
                    n_slow = summary.n_slow_attempts,
                    report = %summary.report_file.display(),
                    "done cycle"
                );
            }
            Err(err) => {
                error!(%err, "cycle failed");
            }
        }
        completed += 1;
        if let Some(limit) = cycles {
            if completed >= limit {
                return Ok(());
            }
        }
        std::thread::sleep(StdDuration::from_secs(config.sleep_period_secs));
    }
}
