//! Per-user run/wait decomposition over a population of attempts.
//!
//! For every user: how much wall-clock time did they have at least one
//! attempt alive ("taskful" time), and how much of it was actually spent
//! running jobs? The remainder is what the user experienced as waiting.
//!
//! Two accounting modes:
//! - plain: job run-core time is converted into equivalent single-user
//!   run time against a fixed per-user core budget;
//! - weighted: when a capacity curve is available, each run second is
//!   weighted by `n_users(t) / running_slots(t)`, i.e. by the fair slice
//!   of the pool the user could claim at that moment.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job_record::{JobRecord, JobStatus};
use crate::series::{InterpSeries, StepSeries};
use crate::sweep::{
    duration_secs, sweep_population, PopulationSpan, PopulationSweep, SweepError,
};
use crate::task_attempt::{AttemptKey, TaskAttempt};

/// Options of one run/wait analysis.
#[derive(Debug, Clone)]
pub struct RunWaitOptions {
    /// Fair per-user core budget for the plain accounting mode.
    pub cores_per_user: u32,
    /// Optional analysis range; periods and job windows crossing its
    /// edges are clipped to it.
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Run/wait totals of one user. Durations in seconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserRunWait {
    pub total_task_attempts: usize,
    pub total_jobs: usize,
    pub total_run_jobs: usize,
    pub total_successful_run_jobs: usize,
    pub taskful_secs: f64,
    pub run_core_secs: f64,
    pub successful_run_core_secs: f64,
    pub run_secs: f64,
    pub successful_run_secs: f64,
    pub wait_secs: f64,
    pub run_proportion: f64,
    pub successful_run_proportion: f64,
    pub wait_proportion: f64,
}

/// Seconds of `[from, to)` overlapping the optional range.
fn clipped_secs(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> f64 {
    let (from, to) = match range {
        Some((range_start, range_end)) => (from.max(range_start), to.min(range_end)),
        None => (from, to),
    };
    if to <= from {
        0.0
    } else {
        duration_secs(to - from)
    }
}

/// The effective run window of a job: actual start (never before its
/// creation) to its end.
fn run_window(job: &JobRecord) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let started = job.started_at?;
    Some((started.max(job.created_at), job.ended_at))
}

/// Fair-claim multiplier curve: `n_users(t) / running_slots(t)` as a
/// step series over the union of both curves' breakpoints.
fn multiplier_series(population: &PopulationSweep<String, AttemptKey>, slots: &InterpSeries) -> StepSeries {
    let n_users = StepSeries::new(
        population
            .periods
            .iter()
            .map(|p| (p.start, p.live_categories as f64))
            .collect(),
    );
    let mut breakpoints: Vec<DateTime<Utc>> = n_users.breakpoints().to_vec();
    breakpoints.extend(population.periods.iter().map(|p| p.end));
    // Capacity samples refine the curve between population periods.
    breakpoints.extend(slots.sample_times().iter().copied());
    breakpoints.sort_unstable();
    breakpoints.dedup();

    StepSeries::new(
        breakpoints
            .into_iter()
            .map(|at| {
                let slots_now = slots.value_at(at);
                let value = if slots_now > 0.0 {
                    n_users.value_at(at) / slots_now
                } else {
                    0.0
                };
                (at, value)
            })
            .collect(),
    )
}

/// Decompose the population into per-user run/wait totals.
///
/// Attempts without a user or without an end are skipped; jobs are
/// matched to users by their own `user_name`. With `capacity` present
/// the weighted mode is used, otherwise the plain per-user core budget.
pub fn analyze_run_wait(
    attempts: &[TaskAttempt],
    jobs: &[JobRecord],
    capacity: Option<&InterpSeries>,
    options: &RunWaitOptions,
) -> Result<BTreeMap<String, UserRunWait>, SweepError> {
    let mut spans = Vec::new();
    let mut user_of_attempt: HashMap<AttemptKey, String> = HashMap::new();
    let mut attempt_secs: HashMap<AttemptKey, f64> = HashMap::new();
    let mut totals: BTreeMap<String, UserRunWait> = BTreeMap::new();

    for attempt in attempts {
        let (Some(user), Some(ended_at)) = (attempt.user_name.as_ref(), attempt.ended_at) else {
            continue;
        };
        spans.push(PopulationSpan {
            category: user.clone(),
            entity: attempt.key,
            start: attempt.started_at,
            end: ended_at,
        });
        user_of_attempt.insert(attempt.key, user.clone());
        attempt_secs.insert(attempt.key, duration_secs(ended_at - attempt.started_at));
        totals.entry(user.clone()).or_default().total_task_attempts += 1;
    }

    let population = sweep_population(&spans)?;

    // Taskful time: full period duration for every user with a live
    // attempt, clipped to the analysis range.
    let mut live_users: HashSet<String> = HashSet::new();
    for period in &population.periods {
        for user in &period.categories_entered {
            live_users.insert(user.clone());
        }
        for user in &period.categories_left {
            live_users.remove(user);
        }
        let secs = clipped_secs(period.start, period.end, options.range);
        if secs > 0.0 {
            for user in &live_users {
                totals.entry(user.clone()).or_default().taskful_secs += secs;
            }
        }
    }

    // Job counts and raw run-core time.
    let mut attempt_run_core: HashMap<AttemptKey, (f64, f64)> = HashMap::new();
    for job in jobs {
        let Some(user) = job.user_name.clone() else {
            continue;
        };
        if let Some((range_start, range_end)) = options.range {
            if job.created_at > range_end || job.ended_at < range_start {
                continue;
            }
        }
        let entry = totals.entry(user).or_default();
        entry.total_jobs += 1;

        let (Some(cores), Some((run_start, run_end))) = (job.core_count, run_window(job)) else {
            continue;
        };
        let run_secs = clipped_secs(run_start, run_end, options.range);
        if run_secs <= 0.0 {
            continue;
        }
        let core_secs = run_secs * cores as f64;
        entry.total_run_jobs += 1;
        entry.run_core_secs += core_secs;
        if job.status == JobStatus::Finished {
            entry.total_successful_run_jobs += 1;
            entry.successful_run_core_secs += core_secs;
        }

        let key = AttemptKey::new(job.task_id, job.attempt_nr);
        let attempt_entry = attempt_run_core.entry(key).or_default();
        attempt_entry.0 += core_secs;
        if job.status == JobStatus::Finished {
            attempt_entry.1 += core_secs;
        }
    }

    match capacity {
        Some(slots) => {
            weighted_run_time(&population, jobs, slots, options, &mut totals);
        }
        None => {
            plain_run_time(&population, &user_of_attempt, &attempt_secs, &attempt_run_core, options, &mut totals);
        }
    }

    for user_totals in totals.values_mut() {
        user_totals.wait_secs = (user_totals.taskful_secs - user_totals.run_secs).max(0.0);
        if user_totals.taskful_secs > 0.0 {
            user_totals.run_proportion = user_totals.run_secs / user_totals.taskful_secs;
            user_totals.successful_run_proportion =
                user_totals.successful_run_secs / user_totals.taskful_secs;
            user_totals.wait_proportion = user_totals.wait_secs / user_totals.taskful_secs;
        }
    }
    Ok(totals)
}

/// Plain mode: spread each attempt's run-core time over the periods it
/// lives in, scaled down to the per-user core budget.
fn plain_run_time(
    population: &PopulationSweep<String, AttemptKey>,
    user_of_attempt: &HashMap<AttemptKey, String>,
    attempt_secs: &HashMap<AttemptKey, f64>,
    attempt_run_core: &HashMap<AttemptKey, (f64, f64)>,
    options: &RunWaitOptions,
    totals: &mut BTreeMap<String, UserRunWait>,
) {
    let budget = options.cores_per_user as f64;
    let mut live_attempts: HashSet<AttemptKey> = HashSet::new();
    for period in &population.periods {
        for (_, key) in &period.entered {
            live_attempts.insert(*key);
        }
        for (_, key) in &period.left {
            live_attempts.remove(key);
        }
        let secs = clipped_secs(period.start, period.end, options.range);
        if secs <= 0.0 {
            continue;
        }
        for key in &live_attempts {
            let total_secs = attempt_secs.get(key).copied().unwrap_or(0.0);
            if total_secs <= 0.0 {
                continue;
            }
            let Some((run_core, successful_run_core)) = attempt_run_core.get(key) else {
                continue;
            };
            let Some(user) = user_of_attempt.get(key) else {
                continue;
            };
            let ratio = secs / total_secs;
            let entry = totals.entry(user.clone()).or_default();
            entry.run_secs += run_core * ratio / budget;
            entry.successful_run_secs += successful_run_core * ratio / budget;
        }
    }
}

/// Weighted mode: integrate each job's run window against the
/// fair-claim multiplier curve.
fn weighted_run_time(
    population: &PopulationSweep<String, AttemptKey>,
    jobs: &[JobRecord],
    slots: &InterpSeries,
    options: &RunWaitOptions,
    totals: &mut BTreeMap<String, UserRunWait>,
) {
    let multiplier = multiplier_series(population, slots);
    for job in jobs {
        let Some(user) = job.user_name.clone() else {
            continue;
        };
        let (Some(cores), Some((run_start, run_end))) = (job.core_count, run_window(job)) else {
            continue;
        };
        let (from, to) = match options.range {
            Some((range_start, range_end)) => (run_start.max(range_start), run_end.min(range_end)),
            None => (run_start, run_end),
        };
        if to <= from {
            continue;
        }
        let weighted = multiplier.integral(from, to) * cores as f64;
        let entry = totals.entry(user).or_default();
        entry.run_secs += weighted;
        if job.status == JobStatus::Finished {
            entry.successful_run_secs += weighted;
        }
    }
}
