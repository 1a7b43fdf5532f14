//! Analyzer configuration: every threshold the analysis run needs,
//! loadable from a flat TOML file.
//!
//! The algorithms take this object by reference and carry no thresholds
//! of their own; validation happens once at run start so a bad value can
//! never surface mid-computation.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job_record::JobStatus;
use crate::sweep::Phase;

/// Errors detected while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A (status, phase) pair, used for threshold lookups and exemptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPhase {
    pub status: JobStatus,
    pub phase: Phase,
}

/// Per-phase hour limits for one job status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseHours {
    pub wait: f64,
    pub run: f64,
}

impl PhaseHours {
    fn get(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Wait => self.wait,
            Phase::Run => self.run,
        }
    }
}

/// Hour limits qualifying an individual job as bad, per final status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobHourLimits {
    pub finished: PhaseHours,
    pub failed: PhaseHours,
    pub closed: PhaseHours,
    pub cancelled: PhaseHours,
}

impl JobHourLimits {
    pub fn limit_hours(&self, status: JobStatus, phase: Phase) -> f64 {
        match status {
            JobStatus::Finished => self.finished.get(phase),
            JobStatus::Failed => self.failed.get(phase),
            JobStatus::Closed => self.closed.get(phase),
            JobStatus::Cancelled => self.cancelled.get(phase),
        }
    }
}

impl Default for JobHourLimits {
    fn default() -> Self {
        Self {
            finished: PhaseHours {
                wait: 16.0,
                run: 96.0,
            },
            failed: PhaseHours {
                wait: 16.0,
                run: 16.0,
            },
            closed: PhaseHours {
                wait: 12.0,
                run: 16.0,
            },
            cancelled: PhaseHours {
                wait: 16.0,
                run: 16.0,
            },
        }
    }
}

/// Full configuration of an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Lookback window: only attempts of tasks created this recently are
    /// considered.
    pub since_hours: f64,
    /// An attempt counts as a slow-task candidate above this duration.
    pub task_duration_max_hours: f64,
    /// A candidate is slow when its successful run time stays below this
    /// percentage of the attempt duration.
    pub task_successful_run_time_min_percent: f64,
    /// A single status stay longer than this is flagged.
    pub task_each_status_max_hours: f64,
    /// A gap with no job activity longer than this is flagged.
    pub jobless_interval_max_hours: f64,
    /// A (status, phase) share of the attempt duration at or above this
    /// percentage is flagged.
    pub job_bad_time_max_percent: f64,
    /// Daemon cycle period.
    pub sleep_period_secs: u64,
    /// Where daemon cycles write their reports.
    pub report_dir: PathBuf,
    /// Bounded worker pool size for per-attempt analysis.
    pub worker_threads: usize,
    /// Fair per-user core budget used by the plain run/wait analysis.
    pub cores_per_user: u32,
    /// Statuses in which a task is genuinely working; stays in these are
    /// never flagged as long.
    pub active_statuses: Vec<String>,
    /// (status, phase) combinations excluded from bad-time tags. The
    /// default exempts (finished, run): an attempt's own successful run
    /// time is the productive part of its duration, not a slowness
    /// signal.
    pub bad_time_exempt: Vec<StatusPhase>,
    /// Hour limits qualifying individual jobs as bad.
    pub job_max_hours: JobHourLimits,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            since_hours: 336.0,
            task_duration_max_hours: 168.0,
            task_successful_run_time_min_percent: 80.0,
            task_each_status_max_hours: 12.0,
            jobless_interval_max_hours: 16.0,
            job_bad_time_max_percent: 10.0,
            sleep_period_secs: 300,
            report_dir: PathBuf::from("/tmp/slow_task_dumps"),
            worker_threads: 4,
            cores_per_user: 100,
            active_statuses: vec![
                "scouting".to_string(),
                "running".to_string(),
                "processing".to_string(),
            ],
            bad_time_exempt: vec![StatusPhase {
                status: JobStatus::Finished,
                phase: Phase::Run,
            }],
            job_max_hours: JobHourLimits::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Load a TOML config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AnalyzerConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject nonsensical values before any computation starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, f64); 5] = [
            ("since_hours", self.since_hours),
            ("task_duration_max_hours", self.task_duration_max_hours),
            ("task_each_status_max_hours", self.task_each_status_max_hours),
            ("jobless_interval_max_hours", self.jobless_interval_max_hours),
            ("job_bad_time_max_percent", self.job_bad_time_max_percent),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        let percent = self.task_successful_run_time_min_percent;
        if !(0.0..=100.0).contains(&percent) {
            return Err(ConfigError::Invalid {
                field: "task_successful_run_time_min_percent",
                reason: format!("must be within 0..=100, got {percent}"),
            });
        }
        for &status in &JobStatus::ALL {
            for &phase in &Phase::ALL {
                let limit = self.job_max_hours.limit_hours(status, phase);
                if !limit.is_finite() || limit <= 0.0 {
                    return Err(ConfigError::Invalid {
                        field: "job_max_hours",
                        reason: format!("{status}.{phase} must be positive, got {limit}"),
                    });
                }
            }
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sleep_period_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sleep_period_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cores_per_user == 0 {
            return Err(ConfigError::Invalid {
                field: "cores_per_user",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Start of the lookback window relative to `now`.
    pub fn created_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - hours(self.since_hours)
    }

    pub fn is_bad_time_exempt(&self, status: JobStatus, phase: Phase) -> bool {
        self.bad_time_exempt
            .iter()
            .any(|e| e.status == status && e.phase == phase)
    }
}

/// Fractional hours as an exact millisecond duration.
pub fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}
