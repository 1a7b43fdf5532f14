//! Text rendering of analysis results.
//!
//! Renderers receive finished data and only format it; nothing in here
//! computes, filters or thresholds. The JSON output path goes through
//! serde instead and shares the second-based duration encoding below.

use chrono::{DateTime, Duration, Utc};

use crate::analyzer::{AnalysisRun, AttemptAnalysis};
use crate::config::AnalyzerConfig;
use crate::diagnostics::{BadJobSummary, JoblessGap, StatusStay};
use crate::job_record::JobStatus;
use crate::run_wait::UserRunWait;
use crate::sweep::{duration_secs, Phase, TimeConsumption};

/// Serde encoding of `chrono::Duration` as fractional seconds.
pub mod duration_secs_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::duration_secs(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::microseconds((secs * 1e6).round() as i64))
    }
}

/// `3d 04:05:06` rendering of a duration.
pub fn format_duration_dhms(duration: Duration) -> String {
    let mut total = duration.num_seconds();
    if total < 0 {
        total = 0;
    }
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
}

/// Same rendering for second counts coming out of the attribution.
pub fn format_secs_dhms(secs: f64) -> String {
    format_duration_dhms(Duration::seconds(secs.round() as i64))
}

fn format_ts(at: DateTime<Utc>) -> String {
    at.format("%y-%m-%d %H:%M:%S").to_string()
}

/// Header table of all slow attempts found by a run.
pub fn slow_attempts_table(run: &AnalysisRun) -> String {
    let mut lines = Vec::with_capacity(run.attempts.len() + 1);
    lines.push(format!(
        "{:>10}  {:>4} | {:>10} {:>20}  {:>20}  {:>15}    {:>7}",
        "taskID", "#N", "status", "startTime", "endTime", "duration", "SRTR%"
    ));
    for analysis in &run.attempts {
        lines.push(format!(
            "{:>10}  {:>4} | {:>10} {:>20}  {:>20}  {:>15}    {:>6.2}%",
            analysis.key.task_id,
            analysis.key.attempt_nr,
            analysis.final_status,
            format_ts(analysis.started_at),
            format_ts(analysis.ended_at),
            format_duration_dhms(analysis.duration),
            analysis.successful_run_time_ratio * 100.0,
        ));
    }
    lines.join("\n")
}

fn long_status_table(stays: &[StatusStay]) -> String {
    let mut lines = Vec::with_capacity(stays.len() + 1);
    lines.push(format!(
        "  {:>11} | {:>17} | {:>15}",
        "status", "since", "duration"
    ));
    for stay in stays {
        lines.push(format!(
            "  {:>11} | {:>17} | {:>15}",
            stay.status,
            format_ts(stay.since),
            format_duration_dhms(stay.duration),
        ));
    }
    lines.join("\n")
}

fn jobless_gap_table(gaps: &[JoblessGap]) -> String {
    let mut lines = Vec::with_capacity(gaps.len() + 1);
    lines.push(format!(
        "  {:>20} , {:>17} | {:>20} , {:>17} |  {:>15}",
        "PreviousJob", "Ended At", "FollowingJob", "Created At", "Duration"
    ));
    for gap in gaps {
        let last_job = gap
            .last_job
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(attempt start)".to_string());
        lines.push(format!(
            "  {:>20} , {:>17} | {:>20} , {:>17} |  {:>15}",
            last_job,
            format_ts(gap.last_end),
            gap.next_job,
            format_ts(gap.next_created),
            format_duration_dhms(gap.duration),
        ));
    }
    lines.join("\n")
}

/// The status × phase attribution matrix with percentages of the attempt
/// duration.
pub fn consumption_matrix(consumption: &TimeConsumption, attempt_duration: Duration) -> String {
    let attempt_secs = duration_secs(attempt_duration);
    let cell = |secs: f64| {
        let percent = if attempt_secs > 0.0 {
            (secs * 100.0 / attempt_secs).round() as i64
        } else {
            0
        };
        format!("{:>13} ({:>2}%)", format_secs_dhms(secs), percent)
    };

    let mut lines = Vec::with_capacity(JobStatus::ALL.len() + 2);
    lines.push(format!(
        "             | {:>20} | {:>20} | {:>20} |",
        "waiting", "running", "total"
    ));
    for &status in &JobStatus::ALL {
        lines.push(format!(
            "   {:>9} | {:>20} | {:>20} | {:>20} |",
            status.as_str(),
            cell(consumption.share_secs(status, Phase::Wait)),
            cell(consumption.share_secs(status, Phase::Run)),
            cell(consumption.status_total_secs(status)),
        ));
    }
    lines.push(format!(
        "   {:>9} | {:>20} | {:>20} | {:>20} |",
        "total",
        cell(consumption.phase_total_secs(Phase::Wait)),
        cell(consumption.phase_total_secs(Phase::Run)),
        cell(consumption.total_secs()),
    ));
    lines.join("\n")
}

fn bad_jobs_section(bad_jobs: &BadJobSummary) -> String {
    let ids = bad_jobs
        .job_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut lines = vec![
        format!("  Jobs: {ids}"),
        format!(
            "    {:>6} | {:>12} | {:>12} | {:>7} | {}",
            "NJobs", "AvgWaiting", "AvgRunning", "AvgPrio", "jobStatus | computingSite | Dialogs"
        ),
    ];
    for group in &bad_jobs.groups {
        lines.push(format!(
            "    {:>6} | {:>12} | {:>12} | {:>7} | {}",
            group.n_jobs,
            format_duration_dhms(group.avg_wait()),
            format_duration_dhms(group.avg_run()),
            group.avg_priority(),
            group.signature,
        ));
    }
    lines.join("\n")
}

/// The per-attempt culprit section of the report.
pub fn attempt_section(analysis: &AttemptAnalysis) -> String {
    let name = analysis.key.to_string();
    let mut parts = vec![format!(
        "About taskID={} , attemptNr={}",
        analysis.key.task_id, analysis.key.attempt_nr
    )];

    if !analysis.diagnosis.long_statuses.is_empty() {
        parts.push(format!(
            "task_attempt={} got {} long statuses:\n{}",
            name,
            analysis.diagnosis.long_statuses.len(),
            long_status_table(&analysis.diagnosis.long_statuses),
        ));
    }
    if !analysis.diagnosis.jobless_gaps.is_empty() {
        parts.push(format!(
            "task_attempt={} got {} jobless intervals:\n{}",
            name,
            analysis.diagnosis.jobless_gaps.len(),
            jobless_gap_table(&analysis.diagnosis.jobless_gaps),
        ));
    }
    parts.push(format!(
        "task_attempt={} time consumption of jobs:\n{}\n\n  jobful time: {:.2}% , successful run time: {:.2}%",
        name,
        consumption_matrix(&analysis.consumption, analysis.duration),
        analysis.jobful_time_ratio * 100.0,
        analysis.successful_run_time_ratio * 100.0,
    ));
    if !analysis.diagnosis.bad_jobs.job_ids.is_empty() {
        parts.push(format!(
            "task_attempt={} got {} bad jobs:\n{}",
            name,
            analysis.diagnosis.bad_jobs.job_ids.len(),
            bad_jobs_section(&analysis.diagnosis.bad_jobs),
        ));
    }

    let mut reasons: Vec<String> = analysis
        .diagnosis
        .tags
        .iter()
        .map(|tag| tag.to_string())
        .collect();
    reasons.sort();
    parts.push(format!(
        "task_attempt={} slow reason: {}",
        name,
        reasons.join(" ")
    ));
    parts.join("\n\n")
}

/// The complete text report of one analysis run.
pub fn render_report(run: &AnalysisRun, config: &AnalyzerConfig) -> String {
    let mut sections = Vec::new();
    sections.push(format!(
        "Report created at {}\n\n\
         Parameters:\n\
         since_hours = {}\n\
         task_duration_max_hours = {}\n\
         task_successful_run_time_min_percent = {}\n\
         task_each_status_max_hours = {}\n\
         jobless_interval_max_hours = {}\n\
         job_bad_time_max_percent = {}",
        format_ts(run.generated_at),
        config.since_hours,
        config.task_duration_max_hours,
        config.task_successful_run_time_min_percent,
        config.task_each_status_max_hours,
        config.jobless_interval_max_hours,
        config.job_bad_time_max_percent,
    ));
    sections.push(format!(
        "got {} slow task attempts (of {} candidates across {} tasks):\n{}",
        run.attempts.len(),
        run.n_candidates,
        run.n_tasks,
        slow_attempts_table(run),
    ));
    sections.push(format!("{}\nCulprits of slowness:", "=".repeat(64)));
    for analysis in &run.attempts {
        sections.push(attempt_section(analysis));
        sections.push("_".repeat(64));
    }
    sections.push("End of report".to_string());
    sections.join("\n\n")
}

/// Per-user run/wait summary table.
pub fn run_wait_table(totals: &std::collections::BTreeMap<String, UserRunWait>) -> String {
    let mut lines = Vec::with_capacity(totals.len() + 1);
    lines.push(format!(
        "{:>24} | {:>8} | {:>8} | {:>15} | {:>15} | {:>15} | {:>6} | {:>6} | {:>6}",
        "user", "attempts", "jobs", "taskful", "run", "wait", "run%", "srun%", "wait%"
    ));
    for (user, user_totals) in totals {
        lines.push(format!(
            "{:>24} | {:>8} | {:>8} | {:>15} | {:>15} | {:>15} | {:>5.1}% | {:>5.1}% | {:>5.1}%",
            user,
            user_totals.total_task_attempts,
            user_totals.total_jobs,
            format_secs_dhms(user_totals.taskful_secs),
            format_secs_dhms(user_totals.run_secs),
            format_secs_dhms(user_totals.wait_secs),
            user_totals.run_proportion * 100.0,
            user_totals.successful_run_proportion * 100.0,
            user_totals.wait_proportion * 100.0,
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{RecordBundle, TaskRecords};
    use crate::task_attempt::StatusStamp;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_format_duration_dhms() {
        let d = Duration::days(3) + Duration::hours(4) + Duration::minutes(5) + Duration::seconds(6);
        assert_eq!(format_duration_dhms(d), "3d 04:05:06");
        assert_eq!(format_duration_dhms(Duration::zero()), "0d 00:00:00");
        assert_eq!(format_duration_dhms(Duration::seconds(-5)), "0d 00:00:00");
    }

    #[test]
    fn test_duration_secs_serde_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "duration_secs_serde")]
            d: Duration,
        }
        let json = serde_json::to_string(&Wrapper {
            d: Duration::milliseconds(1500),
        })
        .unwrap();
        assert_eq!(json, "{\"d\":1.5}");
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.d, Duration::milliseconds(1500));
    }

    #[test]
    fn test_render_report_end_to_end() {
        use crate::analyzer::analyze_slow_attempts;
        use crate::config::AnalyzerConfig;
        use crate::job_record::{JobRecord, JobStatus};

        let hour = 3600;
        let store = RecordBundle::new(vec![TaskRecords {
            task_id: 42,
            user_name: Some("alice".to_string()),
            status_log: vec![
                StatusStamp {
                    status: "running".to_string(),
                    at: ts(0),
                },
                StatusStamp {
                    status: "finished".to_string(),
                    at: ts(200 * hour),
                },
            ],
            jobs: vec![JobRecord {
                id: 9001,
                task_id: 42,
                attempt_nr: 1,
                user_name: Some("alice".to_string()),
                status: JobStatus::Finished,
                core_count: Some(8),
                priority: 50,
                computing_site: Some("SITE_A".to_string()),
                created_at: ts(30 * hour),
                started_at: Some(ts(31 * hour)),
                ended_at: ts(40 * hour),
                errors: Vec::new(),
            }],
        }])
        .unwrap();
        let config = AnalyzerConfig {
            since_hours: 100_000.0,
            ..AnalyzerConfig::default()
        };
        let run = analyze_slow_attempts(&store, &config, ts(300 * hour)).unwrap();
        assert_eq!(run.attempts.len(), 1);

        let report = render_report(&run, &config);
        assert!(report.contains("Report created at"));
        assert!(report.contains("got 1 slow task attempts"));
        assert!(report.contains("Culprits of slowness:"));
        assert!(report.contains("42"));
        assert!(report.contains("slow reason:"));
        assert!(report.contains("End of report"));
        // The 30h lead-in with no jobs shows up as a jobless interval.
        assert!(report.contains("JoblessIntervalLong"));
    }

    #[test]
    fn test_consumption_matrix_shape() {
        let matrix = consumption_matrix(&TimeConsumption::default(), Duration::hours(10));
        let lines: Vec<&str> = matrix.lines().collect();
        // Header + four statuses + totals.
        assert_eq!(lines.len(), 6);
        assert!(lines[0].contains("waiting"));
        assert!(lines[5].contains("total"));
    }
}
