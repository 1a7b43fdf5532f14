//! Culprit diagnostics: why was this attempt slow?
//!
//! Consumes one attempt's reconstructed status history plus the job-level
//! time attribution and flags the concrete patterns operators look for —
//! statuses the task sat in for too long, stretches with no job activity,
//! categories eating an outsized share of the duration, and individually
//! pathological jobs grouped by their error signature.
//!
//! Every threshold comes from the configuration object; the rules here
//! hold no constants of their own.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{hours, AnalyzerConfig};
use crate::job_record::{JobRecord, JobStatus};
use crate::report::duration_secs_serde;
use crate::sweep::{duration_secs, Phase, TimeConsumption};
use crate::task_attempt::TaskAttempt;

/// A slow-reason tag attached to an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticTag {
    /// Some non-active status persisted beyond the configured limit.
    TaskStatusLong,
    /// A gap with no job activity exceeded the configured limit.
    JoblessIntervalLong,
    /// One (status, phase) share of the attempt duration crossed the
    /// configured percentage.
    JobTimeLong { status: JobStatus, phase: Phase },
}

// Tag rendering matches the operator-facing vocabulary: JobFailedWaitLong,
// JobClosedRunLong, ...
impl fmt::Display for DiagnosticTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticTag::TaskStatusLong => f.write_str("TaskStatusLong"),
            DiagnosticTag::JoblessIntervalLong => f.write_str("JoblessIntervalLong"),
            DiagnosticTag::JobTimeLong { status, phase } => {
                let phase = match phase {
                    Phase::Wait => "Wait",
                    Phase::Run => "Run",
                };
                write!(f, "Job{}{}Long", status.capitalized(), phase)
            }
        }
    }
}

impl Serialize for DiagnosticTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One stay of the task in a single status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusStay {
    pub status: String,
    pub since: DateTime<Utc>,
    #[serde(with = "duration_secs_serde")]
    pub duration: Duration,
}

/// A stretch of the attempt with no job active.
#[derive(Debug, Clone, Serialize)]
pub struct JoblessGap {
    #[serde(with = "duration_secs_serde")]
    pub duration: Duration,
    /// Job whose end opened the gap; `None` when the gap starts at the
    /// attempt itself.
    pub last_job: Option<i64>,
    pub last_end: DateTime<Utc>,
    pub next_job: i64,
    pub next_created: DateTime<Utc>,
}

/// Bad jobs failing the same way, ranked for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BadJobGroup {
    pub signature: String,
    pub n_jobs: usize,
    #[serde(with = "duration_secs_serde")]
    pub wait_total: Duration,
    #[serde(with = "duration_secs_serde")]
    pub run_total: Duration,
    pub priority_sum: i64,
}

impl BadJobGroup {
    pub fn avg_wait(&self) -> Duration {
        self.wait_total / self.n_jobs as i32
    }

    pub fn avg_run(&self) -> Duration {
        self.run_total / self.n_jobs as i32
    }

    pub fn avg_priority(&self) -> i64 {
        self.priority_sum / self.n_jobs as i64
    }
}

/// Individually bad jobs of one attempt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BadJobSummary {
    pub job_ids: Vec<i64>,
    /// Groups ranked by (job count, total consumed time) descending.
    pub groups: Vec<BadJobGroup>,
}

/// Complete diagnosis of one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptDiagnosis {
    pub tags: BTreeSet<DiagnosticTag>,
    pub long_statuses: Vec<StatusStay>,
    pub jobless_gaps: Vec<JoblessGap>,
    pub bad_jobs: BadJobSummary,
}

/// Expand an attempt's status history into stays with durations.
///
/// Each stay lasts until the next status change; the final stay has zero
/// duration because nothing bounds it.
pub fn status_stays(attempt: &TaskAttempt) -> Vec<StatusStay> {
    let history = &attempt.status_history;
    history
        .iter()
        .enumerate()
        .map(|(i, stamp)| {
            let duration = history
                .get(i + 1)
                .map(|next| next.at - stamp.at)
                .unwrap_or_else(Duration::zero);
            StatusStay {
                status: stamp.status.clone(),
                since: stamp.at,
                duration,
            }
        })
        .collect()
}

/// Stays in non-active statuses longer than the configured limit.
pub fn long_status_stays(stays: &[StatusStay], config: &AnalyzerConfig) -> Vec<StatusStay> {
    let limit = hours(config.task_each_status_max_hours);
    stays
        .iter()
        .filter(|stay| {
            !config.active_statuses.iter().any(|s| s == &stay.status) && stay.duration > limit
        })
        .cloned()
        .collect()
}

/// Gaps between one job's end and the next job's creation, with nothing
/// active in between, longer than the configured limit.
///
/// Jobs are scanned in creation order; a job wholly inside the span
/// already covered by earlier jobs extends nothing and opens no gap.
pub fn jobless_gaps(
    jobs: &[JobRecord],
    attempt_start: DateTime<Utc>,
    config: &AnalyzerConfig,
) -> Vec<JoblessGap> {
    let limit = hours(config.jobless_interval_max_hours);
    let mut ordered: Vec<&JobRecord> = jobs.iter().collect();
    ordered.sort_by_key(|job| job.created_at);

    let mut gaps = Vec::new();
    let mut last_covered = attempt_start;
    let mut last_job: Option<i64> = None;
    for job in ordered {
        if job.ended_at <= last_covered {
            continue;
        }
        if job.created_at > last_covered {
            let gap = job.created_at - last_covered;
            if gap > limit {
                gaps.push(JoblessGap {
                    duration: gap,
                    last_job,
                    last_end: last_covered,
                    next_job: job.id,
                    next_created: job.created_at,
                });
            }
        }
        last_covered = job.ended_at;
        last_job = Some(job.id);
    }
    gaps
}

/// Tags for (status, phase) shares crossing the bad-time percentage.
///
/// Exempted combinations — by default (finished, run) — are skipped via
/// the configuration's exemption list.
pub fn bad_time_tags(
    consumption: &TimeConsumption,
    attempt_duration: Duration,
    config: &AnalyzerConfig,
) -> BTreeSet<DiagnosticTag> {
    let mut tags = BTreeSet::new();
    let attempt_secs = duration_secs(attempt_duration);
    if attempt_secs <= 0.0 {
        return tags;
    }
    for &status in &JobStatus::ALL {
        for &phase in &Phase::ALL {
            if config.is_bad_time_exempt(status, phase) {
                continue;
            }
            let percent = consumption.share_secs(status, phase) * 100.0 / attempt_secs;
            if percent >= config.job_bad_time_max_percent {
                tags.insert(DiagnosticTag::JobTimeLong { status, phase });
            }
        }
    }
    tags
}

/// Whether one job's own wait or run time crosses its per-(status, phase)
/// hour limit.
pub fn is_bad_job(job: &JobRecord, config: &AnalyzerConfig) -> bool {
    let wait_limit = hours(config.job_max_hours.limit_hours(job.status, Phase::Wait));
    let run_limit = hours(config.job_max_hours.limit_hours(job.status, Phase::Run));
    job.wait_duration() > wait_limit || job.run_duration() > run_limit
}

/// Collect and rank the attempt's individually bad jobs.
pub fn collect_bad_jobs(jobs: &[JobRecord], config: &AnalyzerConfig) -> BadJobSummary {
    let mut job_ids = Vec::new();
    let mut groups: HashMap<String, BadJobGroup> = HashMap::new();

    for job in jobs {
        if !is_bad_job(job, config) {
            continue;
        }
        job_ids.push(job.id);
        let signature = job.error_signature();
        let group = groups.entry(signature.clone()).or_insert(BadJobGroup {
            signature,
            n_jobs: 0,
            wait_total: Duration::zero(),
            run_total: Duration::zero(),
            priority_sum: 0,
        });
        group.n_jobs += 1;
        group.wait_total += job.wait_duration();
        group.run_total += job.run_duration();
        group.priority_sum += job.priority;
    }

    job_ids.sort_unstable();
    let mut groups: Vec<BadJobGroup> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        (b.n_jobs, b.wait_total + b.run_total).cmp(&(a.n_jobs, a.wait_total + a.run_total))
    });
    BadJobSummary { job_ids, groups }
}

/// Run every rule against one attempt and collect the tag set.
pub fn diagnose(
    attempt: &TaskAttempt,
    jobs: &[JobRecord],
    consumption: &TimeConsumption,
    attempt_duration: Duration,
    config: &AnalyzerConfig,
) -> AttemptDiagnosis {
    let mut tags = BTreeSet::new();

    let long_statuses = long_status_stays(&status_stays(attempt), config);
    if !long_statuses.is_empty() {
        tags.insert(DiagnosticTag::TaskStatusLong);
    }

    let gaps = jobless_gaps(jobs, attempt.started_at, config);
    if !gaps.is_empty() {
        tags.insert(DiagnosticTag::JoblessIntervalLong);
    }

    tags.extend(bad_time_tags(consumption, attempt_duration, config));

    AttemptDiagnosis {
        tags,
        long_statuses,
        jobless_gaps: gaps,
        bad_jobs: collect_bad_jobs(jobs, config),
    }
}
