//! Typed job records and their derived wait/run durations.
//!
//! Rows arrive from the record store already validated into this shape;
//! the sweep and the diagnostics never see raw provider tuples.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::task_attempt::TaskId;

/// Final status of a job. Closed set: unknown provider strings are
/// rejected at the store boundary, not inside the algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Finished,
    Failed,
    Closed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Finished,
        JobStatus::Failed,
        JobStatus::Closed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Closed => "closed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Capitalized form used to build diagnostic tag names.
    pub fn capitalized(&self) -> &'static str {
        match self {
            JobStatus::Finished => "Finished",
            JobStatus::Failed => "Failed",
            JobStatus::Closed => "Closed",
            JobStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which subsystem reported a job error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Transformation,
    Pilot,
    Executable,
    DataMovement,
    Brokerage,
    Dispatcher,
    TaskBuffer,
    Supervisor,
}

impl ErrorSource {
    fn label(&self) -> &'static str {
        match self {
            ErrorSource::Transformation => "trans",
            ErrorSource::Pilot => "pilot",
            ErrorSource::Executable => "exe",
            ErrorSource::DataMovement => "ddm",
            ErrorSource::Brokerage => "brokr",
            ErrorSource::Dispatcher => "jdisp",
            ErrorSource::TaskBuffer => "tbuf",
            ErrorSource::Supervisor => "sup",
        }
    }
}

/// One non-zero error code reported for a job, with its diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub source: ErrorSource,
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diag: Option<String>,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.diag {
            Some(diag) => write!(f, "{}-{}: {}", self.source.label(), self.code, diag),
            None => write!(f, "{}-{}", self.source.label(), self.code),
        }
    }
}

/// A job row, validated at the store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub task_id: TaskId,
    pub attempt_nr: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_count: Option<u32>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computing_site: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Absent for jobs that never reached a worker node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<JobError>,
}

impl JobRecord {
    /// Time spent queued before execution. A job that never started
    /// waited from creation to its end.
    pub fn wait_duration(&self) -> Duration {
        match self.started_at {
            Some(started) => started - self.created_at,
            None => self.ended_at - self.created_at,
        }
    }

    /// Time spent executing; zero for a job that never started.
    pub fn run_duration(&self) -> Duration {
        match self.started_at {
            Some(started) => self.ended_at - started,
            None => Duration::zero(),
        }
    }

    /// Run time multiplied by the job's core count, for capacity-weighted
    /// accounting. Zero when the core count is unknown.
    pub fn run_core_duration(&self) -> Duration {
        match self.core_count {
            Some(cores) => self.run_duration() * cores as i32,
            None => Duration::zero(),
        }
    }

    /// Grouping key for bad-job ranking: status, site and the normalized
    /// error diagnostics. Volatile fragments (ids, counters, addresses)
    /// are collapsed so jobs failing the same way share one group.
    pub fn error_signature(&self) -> String {
        let site = self.computing_site.as_deref().unwrap_or("");
        let diags = self
            .errors
            .iter()
            .map(|e| normalize_diag(&e.to_string()))
            .collect::<Vec<_>>()
            .join("; ");
        format!("{:>11} | {:>24} | {}", self.status, site, diags)
    }
}

/// Collapse digit runs so diagnostics differing only in ids/counters map
/// to the same signature.
fn normalize_diag(diag: &str) -> String {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("static pattern"));
    digits.replace_all(diag.trim(), "#").into_owned()
}
