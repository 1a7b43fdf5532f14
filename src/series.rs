//! Piecewise time series for capacity/occupancy curves.
//!
//! Both flavors keep sorted breakpoints and answer lookups with a binary
//! search instead of walking samples, so integrating a job's run window
//! against a multiplier curve stays cheap however long the curve is.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One observed sample of an external curve (running slots, occupancy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesSample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// A piecewise-constant (step) function of time.
///
/// The value at `t` is the value of the last breakpoint at or before `t`;
/// queries before the first breakpoint clamp to the first value.
#[derive(Debug, Clone, Default)]
pub struct StepSeries {
    starts: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl StepSeries {
    /// Build from (breakpoint, value) pairs. Pairs are sorted by time;
    /// duplicate breakpoints keep the later value.
    pub fn new(mut breakpoints: Vec<(DateTime<Utc>, f64)>) -> Self {
        breakpoints.sort_by_key(|&(at, _)| at);
        let mut starts = Vec::with_capacity(breakpoints.len());
        let mut values = Vec::with_capacity(breakpoints.len());
        for (at, value) in breakpoints {
            if starts.last() == Some(&at) {
                *values.last_mut().expect("non-empty with last start") = value;
            } else {
                starts.push(at);
                values.push(value);
            }
        }
        Self { starts, values }
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn breakpoints(&self) -> &[DateTime<Utc>] {
        &self.starts
    }

    /// Step value at `t`; zero for an empty series.
    pub fn value_at(&self, at: DateTime<Utc>) -> f64 {
        if self.starts.is_empty() {
            return 0.0;
        }
        let idx = self.starts.partition_point(|&start| start <= at);
        if idx == 0 {
            self.values[0]
        } else {
            self.values[idx - 1]
        }
    }

    /// Exact integral of the step function over `[from, to)`, in
    /// value·seconds. Zero when `to <= from` or the series is empty.
    pub fn integral(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        if self.starts.is_empty() || to <= from {
            return 0.0;
        }
        let mut total = 0.0;
        let mut cursor = from;
        // First breakpoint strictly inside the window.
        let mut idx = self.starts.partition_point(|&start| start <= from);
        while cursor < to {
            let piece_end = match self.starts.get(idx) {
                Some(&next) if next < to => next,
                _ => to,
            };
            total += self.value_at(cursor) * secs_between(cursor, piece_end);
            cursor = piece_end;
            idx += 1;
        }
        total
    }
}

/// A piecewise-linear interpolated function of time.
///
/// Queries outside the sampled range clamp to the boundary values.
#[derive(Debug, Clone, Default)]
pub struct InterpSeries {
    times: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl InterpSeries {
    /// Build from samples, sorted by time. Duplicate timestamps keep the
    /// later sample.
    pub fn new(mut samples: Vec<SeriesSample>) -> Self {
        samples.sort_by_key(|s| s.at);
        let mut times = Vec::with_capacity(samples.len());
        let mut values = Vec::with_capacity(samples.len());
        for sample in samples {
            if times.last() == Some(&sample.at) {
                *values.last_mut().expect("non-empty with last time") = sample.value;
            } else {
                times.push(sample.at);
                values.push(sample.value);
            }
        }
        Self { times, values }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn sample_times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    /// Linearly interpolated value at `t`; zero for an empty series.
    pub fn value_at(&self, at: DateTime<Utc>) -> f64 {
        if self.times.is_empty() {
            return 0.0;
        }
        if at <= self.times[0] {
            return self.values[0];
        }
        if at >= *self.times.last().expect("non-empty") {
            return *self.values.last().expect("non-empty");
        }
        let idx = self.times.partition_point(|&t| t <= at);
        let (t0, t1) = (self.times[idx - 1], self.times[idx]);
        let (v0, v1) = (self.values[idx - 1], self.values[idx]);
        let fraction = secs_between(t0, at) / secs_between(t0, t1);
        v0 + (v1 - v0) * fraction
    }
}

fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    duration_secs_f64(to - from)
}

fn duration_secs_f64(d: Duration) -> f64 {
    d.num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| d.num_milliseconds() as f64 / 1e3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn step(points: &[(i64, f64)]) -> StepSeries {
        StepSeries::new(points.iter().map(|&(t, v)| (ts(t), v)).collect())
    }

    #[test]
    fn test_step_lookup() {
        let series = step(&[(0, 10.0), (100, 20.0), (200, 5.0)]);
        assert_eq!(series.value_at(ts(0)), 10.0);
        assert_eq!(series.value_at(ts(99)), 10.0);
        assert_eq!(series.value_at(ts(100)), 20.0);
        assert_eq!(series.value_at(ts(500)), 5.0);
    }

    #[test]
    fn test_step_clamps_before_first() {
        let series = step(&[(100, 7.0)]);
        assert_eq!(series.value_at(ts(0)), 7.0);
    }

    #[test]
    fn test_step_unsorted_input() {
        let series = step(&[(200, 5.0), (0, 10.0), (100, 20.0)]);
        assert_eq!(series.value_at(ts(150)), 20.0);
    }

    #[test]
    fn test_step_integral_single_piece() {
        let series = step(&[(0, 2.0)]);
        assert_eq!(series.integral(ts(10), ts(30)), 40.0);
    }

    #[test]
    fn test_step_integral_across_breakpoints() {
        let series = step(&[(0, 1.0), (10, 3.0), (20, 0.5)]);
        // [5,10): 5*1 + [10,20): 10*3 + [20,25): 5*0.5 = 37.5
        assert!((series.integral(ts(5), ts(25)) - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_step_integral_degenerate_window() {
        let series = step(&[(0, 1.0)]);
        assert_eq!(series.integral(ts(10), ts(10)), 0.0);
        assert_eq!(series.integral(ts(20), ts(10)), 0.0);
    }

    #[test]
    fn test_empty_series_are_zero() {
        let series = StepSeries::default();
        assert_eq!(series.value_at(ts(0)), 0.0);
        assert_eq!(series.integral(ts(0), ts(100)), 0.0);
        let interp = InterpSeries::default();
        assert_eq!(interp.value_at(ts(0)), 0.0);
    }

    #[test]
    fn test_interp_midpoint() {
        let samples = vec![
            SeriesSample {
                at: ts(0),
                value: 100.0,
            },
            SeriesSample {
                at: ts(100),
                value: 200.0,
            },
        ];
        let series = InterpSeries::new(samples);
        assert_eq!(series.value_at(ts(50)), 150.0);
        assert_eq!(series.value_at(ts(25)), 125.0);
    }

    #[test]
    fn test_interp_clamps_at_edges() {
        let samples = vec![
            SeriesSample {
                at: ts(100),
                value: 10.0,
            },
            SeriesSample {
                at: ts(200),
                value: 30.0,
            },
        ];
        let series = InterpSeries::new(samples);
        assert_eq!(series.value_at(ts(0)), 10.0);
        assert_eq!(series.value_at(ts(999)), 30.0);
    }

    #[test]
    fn test_step_duplicate_breakpoint_keeps_later() {
        let series = step(&[(0, 1.0), (10, 2.0), (10, 4.0)]);
        assert_eq!(series.value_at(ts(10)), 4.0);
    }
}
