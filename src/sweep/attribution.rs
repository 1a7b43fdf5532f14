// Fair-share time attribution for the jobs of one task attempt.
//
// Attributes wall-clock time to (final job status × wait/run phase), not
// just counts. Key insight: when many jobs overlap, each slice of the
// timeline is split between the live categories in proportion to how many
// jobs each holds, so the shares always sum back to the attributed time.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::job_record::{JobRecord, JobStatus};

use super::engine::{duration_secs, sweep, SweepError};
use super::point::{ChroniclePoint, Phase, PointKind};

/// Attributed time per (status, phase), in seconds.
///
/// `idle` tracks slices where no job was live at all; idle time counts
/// toward the swept span but is deliberately attributed to no category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeConsumption {
    shares: BTreeMap<(JobStatus, Phase), f64>,
    idle_secs: f64,
    span_secs: f64,
}

impl TimeConsumption {
    pub fn share_secs(&self, status: JobStatus, phase: Phase) -> f64 {
        self.shares.get(&(status, phase)).copied().unwrap_or(0.0)
    }

    pub fn status_total_secs(&self, status: JobStatus) -> f64 {
        Phase::ALL
            .iter()
            .map(|&phase| self.share_secs(status, phase))
            .sum()
    }

    pub fn phase_total_secs(&self, phase: Phase) -> f64 {
        JobStatus::ALL
            .iter()
            .map(|&status| self.share_secs(status, phase))
            .sum()
    }

    /// Total time attributed to any category (the "jobful" time).
    pub fn total_secs(&self) -> f64 {
        self.shares.values().sum()
    }

    /// Time inside the swept span with zero live jobs.
    pub fn idle_secs(&self) -> f64 {
        self.idle_secs
    }

    /// Elapsed time between the first and last chronicle point.
    pub fn span_secs(&self) -> f64 {
        self.span_secs
    }

    /// Row-major view keyed by status then phase, with per-status totals.
    pub fn matrix(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut rows = BTreeMap::new();
        for &status in &JobStatus::ALL {
            let mut row = BTreeMap::new();
            for &phase in &Phase::ALL {
                row.insert(phase.as_str().to_string(), self.share_secs(status, phase));
            }
            row.insert("total".to_string(), self.status_total_secs(status));
            rows.insert(status.as_str().to_string(), row);
        }
        let mut totals = BTreeMap::new();
        for &phase in &Phase::ALL {
            totals.insert(phase.as_str().to_string(), self.phase_total_secs(phase));
        }
        totals.insert("total".to_string(), self.total_secs());
        rows.insert("total".to_string(), totals);
        rows
    }
}

impl Serialize for TimeConsumption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let matrix = self.matrix();
        let mut map = serializer.serialize_map(Some(matrix.len() + 2))?;
        for (status, row) in &matrix {
            map.serialize_entry(status, row)?;
        }
        map.serialize_entry("idle", &self.idle_secs)?;
        map.serialize_entry("span", &self.span_secs)?;
        map.end()
    }
}

/// Build the chronicle points for a set of job records.
///
/// Each job contributes a creation point, a start point when it actually
/// started, and an end point; a job that never started therefore stays in
/// its category's wait set until its end point clears it.
fn job_points(jobs: &[JobRecord]) -> Vec<ChroniclePoint<JobStatus, i64>> {
    let mut points = Vec::with_capacity(jobs.len() * 3);
    for job in jobs {
        points.push(ChroniclePoint::new(
            job.created_at,
            job.id,
            job.status,
            PointKind::Created,
        ));
        if let Some(started) = job.started_at {
            points.push(ChroniclePoint::new(
                started,
                job.id,
                job.status,
                PointKind::Started,
            ));
        }
        points.push(ChroniclePoint::new(
            job.ended_at,
            job.id,
            job.status,
            PointKind::Ended,
        ));
    }
    points
}

/// Attribute the jobs' overlapping lifetimes across status × phase.
///
/// Zero jobs is a valid degenerate case and yields an all-zero result.
///
/// # Errors
/// Fails when a job's markers leave an entity live after the final point
/// (malformed provider data); the caller excludes the attempt rather than
/// reporting a truncated split.
pub fn calculate_time_consumption(jobs: &[JobRecord]) -> Result<TimeConsumption, SweepError> {
    let slices = sweep(job_points(jobs))?;

    let mut consumption = TimeConsumption::default();
    for slice in &slices {
        let secs = duration_secs(slice.duration);
        consumption.span_secs += secs;
        if slice.total_live == 0 {
            consumption.idle_secs += secs;
            continue;
        }
        for (&(status, phase), &n) in &slice.live {
            let share = secs * n as f64 / slice.total_live as f64;
            *consumption.shares.entry((status, phase)).or_insert(0.0) += share;
        }
    }
    Ok(consumption)
}
