//! CLI argument parsing for Demora

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

/// Output format for analysis results
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text report (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "demora")]
#[command(version)]
#[command(about = "Retrospective slow-task analyzer for workload-management platforms", long_about = None)]
pub struct Cli {
    /// Enable debug tracing on stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// One-shot slow-task analysis over a records export
    Analyze {
        /// Records export file (JSON)
        #[arg(long = "records", value_name = "FILE")]
        records: PathBuf,

        /// Threshold configuration (TOML); defaults apply when omitted
        #[arg(long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write the result here instead of stdout
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Per-user run/wait decomposition over a records export
    RunWait {
        /// Records export file (JSON)
        #[arg(long = "records", value_name = "FILE")]
        records: PathBuf,

        /// Threshold configuration (TOML); defaults apply when omitted
        #[arg(long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Clip the analysis to times at or after this instant (RFC 3339)
        #[arg(long = "range-start", value_name = "WHEN")]
        range_start: Option<DateTime<Utc>>,

        /// Clip the analysis to times at or before this instant (RFC 3339)
        #[arg(long = "range-end", value_name = "WHEN")]
        range_end: Option<DateTime<Utc>>,

        /// Weight run time by the export's capacity curve
        #[arg(long = "weighted")]
        weighted: bool,

        /// Output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write the result here instead of stdout
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Periodic analysis daemon writing timestamped reports
    Daemon {
        /// Records export file (JSON), re-read every cycle
        #[arg(long = "records", value_name = "FILE")]
        records: PathBuf,

        /// Threshold configuration (TOML); defaults apply when omitted
        #[arg(long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the configured report directory
        #[arg(long = "report-dir", value_name = "DIR")]
        report_dir: Option<PathBuf>,

        /// Stop after this many cycles (runs forever when omitted)
        #[arg(long = "cycles", value_name = "N")]
        cycles: Option<u64>,
    },
}
