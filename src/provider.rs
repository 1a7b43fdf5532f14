//! Record store: the boundary to the platform's historical records.
//!
//! The analyzer only ever sees typed records through the `RecordStore`
//! trait; where the rows actually live (an archive database, an export
//! file) is someone else's problem. `RecordBundle` is the bundled-export
//! implementation used by the CLI and by tests: everything is validated
//! once at load, so malformed rows never reach the algorithms.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job_record::JobRecord;
use crate::series::SeriesSample;
use crate::task_attempt::{AttemptKey, StatusEvent, StatusStamp, TaskId};

/// Errors crossing the record-store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read records file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse records file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed records: {0}")]
    Malformed(String),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

/// Half-open time window used to scope job queries to one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `[from, to]` overlaps this window.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        from <= self.end && to >= self.start
    }
}

/// Read access to the historical records of one analysis run.
///
/// Implementations must answer repeat reads for the same arguments with
/// the same rows for the duration of a run.
pub trait RecordStore: Send + Sync {
    /// Every task with records in the store.
    fn task_ids(&self) -> Result<Vec<TaskId>, StoreError>;

    /// Owner of the task's attempts, when known.
    fn user_name(&self, task_id: TaskId) -> Result<Option<String>, StoreError>;

    /// The task's status log, time-ordered.
    fn status_events(&self, task_id: TaskId) -> Result<Vec<StatusEvent>, StoreError>;

    /// Jobs of one attempt whose lifetime overlaps the window.
    fn job_records(
        &self,
        key: AttemptKey,
        window: TimeWindow,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Samples of the external running-slots curve, when the export
    /// carries one.
    fn capacity_samples(&self) -> Result<Vec<SeriesSample>, StoreError> {
        Ok(Vec::new())
    }
}

/// One task's slice of a records export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecords {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub status_log: Vec<StatusStamp>,
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

/// An in-memory records export implementing `RecordStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordBundle {
    #[serde(default)]
    pub tasks: Vec<TaskRecords>,
    #[serde(default)]
    pub capacity: Vec<SeriesSample>,
}

impl RecordBundle {
    pub fn new(tasks: Vec<TaskRecords>) -> Result<Self, StoreError> {
        let mut bundle = Self {
            tasks,
            capacity: Vec::new(),
        };
        bundle.normalize()?;
        Ok(bundle)
    }

    /// Load and validate a JSON records export.
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut bundle: RecordBundle =
            serde_json::from_str(&text).map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        bundle.normalize()?;
        Ok(bundle)
    }

    /// Validate row consistency and normalize orderings.
    fn normalize(&mut self) -> Result<(), StoreError> {
        for task in &mut self.tasks {
            task.status_log.sort_by_key(|stamp| stamp.at);
            for job in &mut task.jobs {
                if job.user_name.is_none() {
                    job.user_name = task.user_name.clone();
                }
                if job.task_id != task.task_id {
                    return Err(StoreError::Malformed(format!(
                        "job {} carries task_id {} inside task {}",
                        job.id, job.task_id, task.task_id
                    )));
                }
                if job.ended_at < job.created_at {
                    return Err(StoreError::Malformed(format!(
                        "job {} ends before it was created",
                        job.id
                    )));
                }
            }
        }
        self.tasks.sort_by_key(|task| task.task_id);
        Ok(())
    }

    fn task(&self, task_id: TaskId) -> Result<&TaskRecords, StoreError> {
        self.tasks
            .binary_search_by_key(&task_id, |task| task.task_id)
            .map(|idx| &self.tasks[idx])
            .map_err(|_| StoreError::UnknownTask(task_id))
    }

    /// All jobs of the bundle, for population-wide analyses.
    pub fn all_jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.tasks.iter().flat_map(|task| task.jobs.iter())
    }
}

impl RecordStore for RecordBundle {
    fn task_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        Ok(self.tasks.iter().map(|task| task.task_id).collect())
    }

    fn user_name(&self, task_id: TaskId) -> Result<Option<String>, StoreError> {
        Ok(self.task(task_id)?.user_name.clone())
    }

    fn status_events(&self, task_id: TaskId) -> Result<Vec<StatusEvent>, StoreError> {
        let task = self.task(task_id)?;
        Ok(task
            .status_log
            .iter()
            .map(|stamp| StatusEvent {
                task_id,
                at: stamp.at,
                status: stamp.status.clone(),
            })
            .collect())
    }

    fn job_records(
        &self,
        key: AttemptKey,
        window: TimeWindow,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let task = self.task(key.task_id)?;
        Ok(task
            .jobs
            .iter()
            .filter(|job| {
                job.attempt_nr == key.attempt_nr
                    && window.overlaps(job.created_at, job.ended_at)
            })
            .cloned()
            .collect())
    }

    fn capacity_samples(&self) -> Result<Vec<SeriesSample>, StoreError> {
        Ok(self.capacity.clone())
    }
}
