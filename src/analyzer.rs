//! Slow-task analysis: candidate selection, fan-out, per-attempt verdicts.
//!
//! Attempt reconstruction and the sweep are pure and sequential; this is
//! the layer that runs them over many attempts at once. Workers share
//! nothing while computing and touch the aggregate map only inside the
//! merge lock, and one attempt failing to analyze is logged and excluded
//! without taking the rest of the run down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{hours, AnalyzerConfig};
use crate::diagnostics::{diagnose, AttemptDiagnosis};
use crate::job_record::JobStatus;
use crate::provider::{RecordStore, StoreError, TimeWindow};
use crate::report::duration_secs_serde;
use crate::sweep::{
    calculate_time_consumption, duration_secs, Phase, SweepError, TimeConsumption,
};
use crate::task_attempt::{reconstruct_attempts, AttemptKey, TaskAttempt};

/// Errors from analyzing a single attempt.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sweep(#[from] SweepError),
}

/// Everything the analyzer concluded about one slow attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptAnalysis {
    pub key: AttemptKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub final_status: String,
    #[serde(with = "duration_secs_serde")]
    pub duration: Duration,
    pub n_jobs: usize,
    pub consumption: TimeConsumption,
    /// Attributed (jobful) time as a fraction of the attempt duration.
    pub jobful_time_ratio: f64,
    /// Successful run time as a fraction of the attempt duration.
    pub successful_run_time_ratio: f64,
    pub diagnosis: AttemptDiagnosis,
}

/// Result of one analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub generated_at: DateTime<Utc>,
    pub n_tasks: usize,
    pub n_candidates: usize,
    /// Slow attempts, ordered by key.
    pub attempts: Vec<AttemptAnalysis>,
}

/// Reconstruct all attempts and keep the slow-task candidates: complete,
/// inside the lookback window, and longer than the duration threshold.
fn candidate_attempts(
    store: &dyn RecordStore,
    config: &AnalyzerConfig,
    now: DateTime<Utc>,
) -> Result<(usize, Vec<TaskAttempt>), StoreError> {
    let created_since = config.created_since(now);
    let min_duration = hours(config.task_duration_max_hours);

    let task_ids = store.task_ids()?;
    let n_tasks = task_ids.len();
    let mut candidates = Vec::new();
    for task_id in task_ids {
        let events = store.status_events(task_id)?;
        if events.is_empty() {
            continue;
        }
        let user_name = store.user_name(task_id)?;
        for (_, mut attempt) in reconstruct_attempts(&events) {
            if !attempt.is_complete() {
                continue;
            }
            if attempt.started_at < created_since {
                continue;
            }
            let duration = attempt.duration().expect("complete attempt has duration");
            if duration <= min_duration {
                continue;
            }
            attempt.user_name = user_name.clone();
            candidates.push(attempt);
        }
    }
    Ok((n_tasks, candidates))
}

/// Analyze one candidate. `Ok(None)` means the attempt is not slow: its
/// successful run time already fills enough of its duration.
fn analyze_attempt(
    store: &dyn RecordStore,
    attempt: &TaskAttempt,
    config: &AnalyzerConfig,
) -> Result<Option<AttemptAnalysis>, AnalysisError> {
    let ended_at = attempt.ended_at.expect("candidates are complete");
    let duration = attempt.duration().expect("candidates are complete");
    let window = TimeWindow::new(attempt.started_at, ended_at);
    let jobs = store.job_records(attempt.key, window)?;

    let consumption = calculate_time_consumption(&jobs)?;
    let attempt_secs = duration_secs(duration);
    let (jobful_time_ratio, successful_run_time_ratio) = if attempt_secs > 0.0 {
        (
            consumption.total_secs() / attempt_secs,
            consumption.share_secs(JobStatus::Finished, Phase::Run) / attempt_secs,
        )
    } else {
        (0.0, 0.0)
    };

    if successful_run_time_ratio * 100.0 >= config.task_successful_run_time_min_percent {
        return Ok(None);
    }

    let diagnosis = diagnose(attempt, &jobs, &consumption, duration, config);
    Ok(Some(AttemptAnalysis {
        key: attempt.key,
        user_name: attempt.user_name.clone(),
        started_at: attempt.started_at,
        ended_at,
        final_status: attempt
            .final_status
            .clone()
            .expect("candidates are complete"),
        duration,
        n_jobs: jobs.len(),
        consumption,
        jobful_time_ratio,
        successful_run_time_ratio,
        diagnosis,
    }))
}

/// Run the full slow-task analysis over the store.
///
/// Candidates fan out over a bounded worker pool; each worker fetches
/// its own job rows and computes independently, and the shared map is
/// only touched under the merge lock. A worker hitting malformed data
/// logs the attempt and moves on.
pub fn analyze_slow_attempts(
    store: &dyn RecordStore,
    config: &AnalyzerConfig,
    now: DateTime<Utc>,
) -> Result<AnalysisRun, StoreError> {
    let (n_tasks, candidates) = candidate_attempts(store, config, now)?;
    let n_candidates = candidates.len();
    debug!(n_tasks, n_candidates, "reconstructed candidate attempts");

    let results: Mutex<BTreeMap<AttemptKey, AttemptAnalysis>> = Mutex::new(BTreeMap::new());
    let next = AtomicUsize::new(0);
    let n_workers = config.worker_threads.min(n_candidates.max(1));

    std::thread::scope(|scope| {
        for _ in 0..n_workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(attempt) = candidates.get(index) else {
                    break;
                };
                match analyze_attempt(store, attempt, config) {
                    Ok(Some(analysis)) => {
                        let mut map = results.lock().expect("merge lock");
                        map.insert(analysis.key, analysis);
                    }
                    Ok(None) => {
                        debug!(attempt = %attempt.key, "attempt not slow, skipped");
                    }
                    Err(error) => {
                        warn!(attempt = %attempt.key, %error, "excluding attempt from run");
                    }
                }
            });
        }
    });

    let attempts: Vec<AttemptAnalysis> = results
        .into_inner()
        .expect("merge lock")
        .into_values()
        .collect();
    info!(
        n_tasks,
        n_candidates,
        n_slow = attempts.len(),
        "analysis pass complete"
    );
    Ok(AnalysisRun {
        generated_at: now,
        n_tasks,
        n_candidates,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_record::{JobRecord, JobStatus};
    use crate::provider::{RecordBundle, TaskRecords};
    use crate::task_attempt::StatusStamp;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hour(h: i64) -> i64 {
        h * 3600
    }

    fn stamp(status: &str, secs: i64) -> StatusStamp {
        StatusStamp {
            status: status.to_string(),
            at: ts(secs),
        }
    }

    fn job(
        id: i64,
        task_id: i64,
        created: i64,
        started: Option<i64>,
        ended: i64,
        status: JobStatus,
    ) -> JobRecord {
        JobRecord {
            id,
            task_id,
            attempt_nr: 1,
            user_name: None,
            status,
            core_count: Some(1),
            priority: 0,
            computing_site: None,
            created_at: ts(created),
            started_at: started.map(ts),
            ended_at: ts(ended),
            errors: Vec::new(),
        }
    }

    /// One 200h attempt whose only productive job runs for 10h: slow.
    fn slow_task(task_id: i64) -> TaskRecords {
        TaskRecords {
            task_id,
            user_name: Some("alice".to_string()),
            status_log: vec![stamp("running", 0), stamp("finished", hour(200))],
            jobs: vec![job(
                task_id * 1000,
                task_id,
                hour(1),
                Some(hour(2)),
                hour(12),
                JobStatus::Finished,
            )],
        }
    }

    /// A 200h attempt fully covered by successful run time: not slow.
    fn busy_task(task_id: i64) -> TaskRecords {
        TaskRecords {
            task_id,
            user_name: Some("bob".to_string()),
            status_log: vec![stamp("running", 0), stamp("done", hour(200))],
            jobs: vec![job(
                task_id * 1000,
                task_id,
                0,
                Some(hour(1)),
                hour(200),
                JobStatus::Finished,
            )],
        }
    }

    fn run_with(tasks: Vec<TaskRecords>, config: &AnalyzerConfig) -> AnalysisRun {
        let store = RecordBundle::new(tasks).unwrap();
        analyze_slow_attempts(&store, config, ts(hour(250))).unwrap()
    }

    fn wide_config() -> AnalyzerConfig {
        AnalyzerConfig {
            since_hours: 10_000.0,
            ..AnalyzerConfig::default()
        }
    }

    #[test]
    fn test_slow_attempt_detected() {
        let run = run_with(vec![slow_task(1)], &wide_config());
        assert_eq!(run.n_candidates, 1);
        assert_eq!(run.attempts.len(), 1);

        let analysis = &run.attempts[0];
        assert_eq!(analysis.key, AttemptKey::new(1, 1));
        assert_eq!(analysis.final_status, "finished");
        assert_eq!(analysis.n_jobs, 1);
        // 10h of successful run inside a 200h attempt.
        assert!((analysis.successful_run_time_ratio - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_productive_attempt_not_reported() {
        let run = run_with(vec![busy_task(1)], &wide_config());
        assert_eq!(run.n_candidates, 1);
        assert!(run.attempts.is_empty());
    }

    #[test]
    fn test_short_attempt_not_a_candidate() {
        let short = TaskRecords {
            task_id: 1,
            user_name: None,
            status_log: vec![stamp("running", 0), stamp("finished", hour(2))],
            jobs: Vec::new(),
        };
        let run = run_with(vec![short], &wide_config());
        assert_eq!(run.n_candidates, 0);
    }

    #[test]
    fn test_lookback_window_excludes_old_attempts() {
        // Attempt starts at t=0 but the window only reaches back 100h
        // from now=250h.
        let config = AnalyzerConfig {
            since_hours: 100.0,
            ..AnalyzerConfig::default()
        };
        let run = run_with(vec![slow_task(1)], &config);
        assert_eq!(run.n_candidates, 0);
    }

    #[test]
    fn test_incomplete_attempt_excluded() {
        let open_ended = TaskRecords {
            task_id: 1,
            user_name: None,
            status_log: vec![stamp("running", 0)],
            jobs: Vec::new(),
        };
        let run = run_with(vec![open_ended], &wide_config());
        assert_eq!(run.n_candidates, 0);
    }

    #[test]
    fn test_attempt_with_no_jobs_is_all_wait() {
        let jobless = TaskRecords {
            task_id: 3,
            user_name: None,
            status_log: vec![stamp("running", 0), stamp("failed", hour(200))],
            jobs: Vec::new(),
        };
        let run = run_with(vec![jobless], &wide_config());
        assert_eq!(run.attempts.len(), 1);
        let analysis = &run.attempts[0];
        assert_eq!(analysis.n_jobs, 0);
        assert_eq!(analysis.jobful_time_ratio, 0.0);
        assert_eq!(analysis.successful_run_time_ratio, 0.0);
    }

    #[test]
    fn test_parallel_run_is_deterministic() {
        let tasks: Vec<TaskRecords> = (1..=20).map(slow_task).collect();
        let config = AnalyzerConfig {
            worker_threads: 8,
            ..wide_config()
        };
        let first = run_with(tasks.clone(), &config);
        let second = run_with(tasks, &config);
        assert_eq!(first.attempts.len(), 20);
        let first_keys: Vec<AttemptKey> = first.attempts.iter().map(|a| a.key).collect();
        let second_keys: Vec<AttemptKey> = second.attempts.iter().map(|a| a.key).collect();
        assert_eq!(first_keys, second_keys);
        assert!(first_keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_multiple_attempts_of_one_task() {
        let task = TaskRecords {
            task_id: 9,
            user_name: Some("carol".to_string()),
            status_log: vec![
                stamp("running", 0),
                stamp("failed", hour(180)),
                stamp("running", hour(181)),
                stamp("finished", hour(400)),
            ],
            jobs: Vec::new(),
        };
        let run = run_with(vec![task], &wide_config());
        assert_eq!(run.n_candidates, 2);
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.attempts[0].key, AttemptKey::new(9, 1));
        assert_eq!(run.attempts[1].key, AttemptKey::new(9, 2));
    }
}
