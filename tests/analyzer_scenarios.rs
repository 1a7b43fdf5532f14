//! End-to-end scenarios through the library: reconstruction, sweep,
//! diagnostics and the analyzer working over a realistic records bundle.

use chrono::{DateTime, TimeZone, Utc};

use demora::analyzer::analyze_slow_attempts;
use demora::config::AnalyzerConfig;
use demora::diagnostics::DiagnosticTag;
use demora::job_record::{JobRecord, JobStatus};
use demora::provider::{RecordBundle, TaskRecords};
use demora::run_wait::{analyze_run_wait, RunWaitOptions};
use demora::sweep::Phase;
use demora::task_attempt::{reconstruct_attempts, AttemptKey, StatusEvent, StatusStamp};

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
        core_count: Some(8),
        priority: 100,
        computing_site: Some("SITE_A".to_string()),
        created_at: ts(created),
        started_at: started.map(ts),
        ended_at: ts(ended),
        errors: Vec::new(),
    }
}

fn wide_config() -> AnalyzerConfig {
    AnalyzerConfig {
        since_hours: 1_000_000.0,
        ..AnalyzerConfig::default()
    }
}

/// Scenario A: a single (running, finished) pair makes one complete
/// attempt with the right boundaries.
#[test]
fn test_scenario_single_attempt_reconstruction() {
    let events = vec![
        StatusEvent {
            task_id: 11,
            at: ts(1000),
            status: "running".to_string(),
        },
        StatusEvent {
            task_id: 11,
            at: ts(5000),
            status: "finished".to_string(),
        },
    ];
    let attempts = reconstruct_attempts(&events);
    assert_eq!(attempts.len(), 1);
    let attempt = &attempts[&AttemptKey::new(11, 1)];
    assert!(attempt.is_complete());
    assert_eq!(attempt.started_at, ts(1000));
    assert_eq!(attempt.ended_at, Some(ts(5000)));
    assert_eq!(attempt.final_status.as_deref(), Some("finished"));
}

/// Scenario C: failed wait dominates while successful run time stays
/// tiny; only the failed wait tag fires.
#[test]
fn test_scenario_bad_time_tags() {
    // 100h attempt: failed job waits 40h; finished job runs 5h.
    let store = RecordBundle::new(vec![TaskRecords {
        task_id: 21,
        user_name: Some("alice".to_string()),
        status_log: vec![stamp("running", 0), stamp("finished", hour(200))],
        jobs: vec![
            job(1, 21, 0, Some(hour(80)), hour(85), JobStatus::Failed),
            job(2, 21, hour(90), Some(hour(90)), hour(100), JobStatus::Finished),
        ],
    }])
    .unwrap();
    let run = analyze_slow_attempts(&store, &wide_config(), ts(hour(300))).unwrap();
    assert_eq!(run.attempts.len(), 1);

    let tags = &run.attempts[0].diagnosis.tags;
    assert!(tags.contains(&DiagnosticTag::JobTimeLong {
        status: JobStatus::Failed,
        phase: Phase::Wait,
    }));
    // (finished, run) is exempt by policy, and 5h of 200h would be
    // below threshold anyway.
    assert!(!tags.iter().any(|t| matches!(
        t,
        DiagnosticTag::JobTimeLong {
            status: JobStatus::Finished,
            phase: Phase::Run,
        }
    )));
}

/// Scenario D: a 20h jobless gap against a 16h threshold yields exactly
/// one flagged interval spanning it.
#[test]
fn test_scenario_jobless_interval() {
    let store = RecordBundle::new(vec![TaskRecords {
        task_id: 31,
        user_name: None,
        status_log: vec![stamp("running", 0), stamp("done", hour(200))],
        jobs: vec![
            job(1, 31, 0, Some(hour(1)), hour(50), JobStatus::Finished),
            job(2, 31, hour(70), Some(hour(71)), hour(90), JobStatus::Finished),
        ],
    }])
    .unwrap();
    let run = analyze_slow_attempts(&store, &wide_config(), ts(hour(300))).unwrap();
    assert_eq!(run.attempts.len(), 1);

    let diagnosis = &run.attempts[0].diagnosis;
    assert!(diagnosis.tags.contains(&DiagnosticTag::JoblessIntervalLong));
    assert_eq!(diagnosis.jobless_gaps.len(), 1);
    let gap = &diagnosis.jobless_gaps[0];
    assert_eq!(gap.duration.num_hours(), 20);
    assert_eq!(gap.last_job, Some(1));
    assert_eq!(gap.next_job, 2);
}

/// A multi-attempt task mixes slow and healthy attempts; only the slow
/// one is reported.
#[test]
fn test_mixed_attempts_of_one_task() {
    let mut jobs = vec![
        // Attempt 1's only job barely runs.
        job(1, 41, hour(10), Some(hour(11)), hour(15), JobStatus::Finished),
    ];
    // Attempt 2 is fully productive.
    let mut busy = job(2, 41, hour(200), Some(hour(201)), hour(400), JobStatus::Finished);
    busy.attempt_nr = 2;
    jobs.push(busy);

    let store = RecordBundle::new(vec![TaskRecords {
        task_id: 41,
        user_name: Some("bob".to_string()),
        status_log: vec![
            stamp("running", 0),
            stamp("failed", hour(180)),
            stamp("running", hour(200)),
            stamp("finished", hour(400)),
        ],
        jobs,
    }])
    .unwrap();
    let run = analyze_slow_attempts(&store, &wide_config(), ts(hour(500))).unwrap();
    assert_eq!(run.n_candidates, 2);
    assert_eq!(run.attempts.len(), 1);
    assert_eq!(run.attempts[0].key, AttemptKey::new(41, 1));
    assert_eq!(run.attempts[0].final_status, "failed");
}

/// JSON export of a full run stays well-formed and carries the
/// attribution matrix.
#[test]
fn test_json_export_shape() {
    let store = RecordBundle::new(vec![TaskRecords {
        task_id: 51,
        user_name: None,
        status_log: vec![stamp("running", 0), stamp("broken", hour(180))],
        jobs: vec![job(1, 51, hour(5), None, hour(100), JobStatus::Cancelled)],
    }])
    .unwrap();
    let run = analyze_slow_attempts(&store, &wide_config(), ts(hour(300))).unwrap();
    let json = serde_json::to_string_pretty(&run).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let attempt = &value["attempts"][0];
    assert_eq!(attempt["final_status"], "broken");
    assert!(attempt["consumption"]["cancelled"]["wait"].as_f64().unwrap() > 0.0);
    assert!(attempt["consumption"]["idle"].as_f64().is_some());
    assert_eq!(attempt["n_jobs"], 1);
}

/// Run/wait over a mixed population through the same bundle types.
#[test]
fn test_run_wait_population() {
    let store = RecordBundle::new(vec![
        TaskRecords {
            task_id: 61,
            user_name: Some("alice".to_string()),
            status_log: vec![stamp("running", 0), stamp("done", hour(10))],
            jobs: vec![job(1, 61, 0, Some(0), hour(10), JobStatus::Finished)],
        },
        TaskRecords {
            task_id: 62,
            user_name: Some("bob".to_string()),
            status_log: vec![stamp("running", hour(20)), stamp("failed", hour(30))],
            jobs: Vec::new(),
        },
    ])
    .unwrap();

    let mut attempts = Vec::new();
    for task in &store.tasks {
        let events: Vec<StatusEvent> = task
            .status_log
            .iter()
            .map(|s| StatusEvent {
                task_id: task.task_id,
                at: s.at,
                status: s.status.clone(),
            })
            .collect();
        for (_, mut attempt) in reconstruct_attempts(&events) {
            attempt.user_name = task.user_name.clone();
            attempts.push(attempt);
        }
    }
    let jobs: Vec<JobRecord> = store.all_jobs().cloned().collect();
    let totals = analyze_run_wait(
        &attempts,
        &jobs,
        None,
        &RunWaitOptions {
            cores_per_user: 8,
            range: None,
        },
    )
    .unwrap();

    // Alice's 8-core job filled her whole 10h window against an 8-core
    // budget; Bob only waited.
    assert!((totals["alice"].run_proportion - 1.0).abs() < 1e-6);
    assert!((totals["bob"].wait_proportion - 1.0).abs() < 1e-9);
    assert_eq!(totals["bob"].total_jobs, 0);
}
