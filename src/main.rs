use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use demora::{
    agent, analyzer,
    cli::{Cli, Command, OutputFormat},
    config::AnalyzerConfig,
    provider::{RecordBundle, RecordStore},
    report,
    run_wait::{analyze_run_wait, RunWaitOptions},
    series::InterpSeries,
    task_attempt::{reconstruct_attempts, TaskAttempt},
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalyzerConfig> {
    match path {
        Some(path) => AnalyzerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => {
            let config = AnalyzerConfig::default();
            config.validate().context("default configuration")?;
            Ok(config)
        }
    }
}

/// Reconstruct every attempt in the export, with owners attached.
fn collect_attempts(store: &RecordBundle) -> Result<Vec<TaskAttempt>> {
    let mut attempts = Vec::new();
    for task_id in store.task_ids()? {
        let events = store.status_events(task_id)?;
        if events.is_empty() {
            continue;
        }
        let user_name = store.user_name(task_id)?;
        for (_, mut attempt) in reconstruct_attempts(&events) {
            attempt.user_name = user_name.clone();
            attempts.push(attempt);
        }
    }
    Ok(attempts)
}

fn emit(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing output {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Analyze {
            records,
            config,
            format,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            let store = RecordBundle::from_path(&records)
                .with_context(|| format!("loading records {}", records.display()))?;
            let run = analyzer::analyze_slow_attempts(&store, &config, Utc::now())?;
            let text = match format {
                OutputFormat::Text => report::render_report(&run, &config),
                OutputFormat::Json => serde_json::to_string_pretty(&run)?,
            };
            emit(output.as_deref(), &text)
        }

        Command::RunWait {
            records,
            config,
            range_start,
            range_end,
            weighted,
            format,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            let store = RecordBundle::from_path(&records)
                .with_context(|| format!("loading records {}", records.display()))?;
            let attempts = collect_attempts(&store)?;
            let jobs: Vec<_> = store.all_jobs().cloned().collect();

            let capacity = if weighted {
                let samples = store.capacity_samples()?;
                if samples.is_empty() {
                    bail!("--weighted requires capacity samples in the records export");
                }
                Some(InterpSeries::new(samples))
            } else {
                None
            };
            let range = match (range_start, range_end) {
                (Some(start), Some(end)) if start >= end => {
                    bail!("--range-start must be before --range-end");
                }
                (Some(start), Some(end)) => Some((start, end)),
                (None, None) => None,
                _ => bail!("--range-start and --range-end must be given together"),
            };

            let options = RunWaitOptions {
                cores_per_user: config.cores_per_user,
                range,
            };
            let totals = analyze_run_wait(&attempts, &jobs, capacity.as_ref(), &options)?;
            let text = match format {
                OutputFormat::Text => report::run_wait_table(&totals),
                OutputFormat::Json => serde_json::to_string_pretty(&totals)?,
            };
            emit(output.as_deref(), &text)
        }

        Command::Daemon {
            records,
            config,
            report_dir,
            cycles,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = report_dir {
                config.report_dir = dir;
            }
            let store = RecordBundle::from_path(&records)
                .with_context(|| format!("loading records {}", records.display()))?;
            agent::run_daemon(&store, &config, cycles)
        }
    }
}
