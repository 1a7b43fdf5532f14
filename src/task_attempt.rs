//! Task attempts reconstructed from raw status logs.
//!
//! A task's status log is a flat, time-ordered list of status changes
//! covering every retry of the task. Reconstruction cuts that list into
//! discrete attempts: each terminal status closes the open attempt and
//! the next event opens the following one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = i64;

/// Statuses that close an attempt. Fixed and closed: providers may emit
/// any vocabulary for intermediate states, but only these terminate.
pub const TERMINAL_STATUSES: [&str; 5] = ["finished", "done", "failed", "aborted", "broken"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// Identifies one attempt of one task. Attempt numbers start at 1 and
/// strictly increase per task as attempts complete.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AttemptKey {
    pub task_id: TaskId,
    pub attempt_nr: u32,
}

impl AttemptKey {
    pub fn new(task_id: TaskId, attempt_nr: u32) -> Self {
        Self {
            task_id,
            attempt_nr,
        }
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}", self.task_id, self.attempt_nr)
    }
}

/// One row of a task's status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub at: DateTime<Utc>,
    pub status: String,
}

/// One status stay inside an attempt's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStamp {
    pub status: String,
    pub at: DateTime<Utc>,
}

/// One execution lifecycle of a task.
///
/// `ended_at` and `final_status` are set together, exactly when a
/// terminal status closes the attempt; an attempt still open at the end
/// of the input range keeps both unset and reports `is_complete() ==
/// false`. Filtering incomplete attempts out is the caller's decision —
/// reconstruction never discards them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub key: AttemptKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_status: Option<String>,
    pub status_history: Vec<StatusStamp>,
}

impl TaskAttempt {
    fn open(key: AttemptKey, started_at: DateTime<Utc>) -> Self {
        Self {
            key,
            user_name: None,
            started_at,
            ended_at: None,
            final_status: None,
            status_history: Vec::new(),
        }
    }

    fn record(&mut self, status: &str, at: DateTime<Utc>) {
        self.status_history.push(StatusStamp {
            status: status.to_string(),
            at,
        });
        if is_terminal_status(status) {
            self.final_status = Some(status.to_string());
            self.ended_at = Some(at);
        }
    }

    /// Whether the attempt terminated with a final status.
    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Wall-clock duration; `None` while the attempt is still open.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|ended| ended - self.started_at)
    }
}

/// Cut status logs into attempts.
///
/// Events must be time-ordered per task (the record store guarantees
/// this); events of different tasks may interleave freely. Each task's
/// attempt counter starts at 1, the first event seen while no attempt is
/// open starts one, and a terminal status closes it so the next event
/// opens the successor.
pub fn reconstruct_attempts(events: &[StatusEvent]) -> BTreeMap<AttemptKey, TaskAttempt> {
    let mut counters: HashMap<TaskId, u32> = HashMap::new();
    let mut open: HashMap<TaskId, TaskAttempt> = HashMap::new();
    let mut attempts = BTreeMap::new();

    for event in events {
        let attempt = open.entry(event.task_id).or_insert_with(|| {
            let nr = *counters.entry(event.task_id).or_insert(1);
            TaskAttempt::open(AttemptKey::new(event.task_id, nr), event.at)
        });
        attempt.record(&event.status, event.at);
        if attempt.is_complete() {
            let attempt = open.remove(&event.task_id).expect("attempt just closed");
            *counters.entry(event.task_id).or_insert(1) += 1;
            attempts.insert(attempt.key, attempt);
        }
    }

    // Trailing open attempts are kept, flagged incomplete.
    for (_, attempt) in open {
        attempts.insert(attempt.key, attempt);
    }
    attempts
}
