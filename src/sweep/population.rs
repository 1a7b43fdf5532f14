// Attempt-granularity sweep across a whole population.
//
// Same engine as the job-level attribution, but each entity is a task
// attempt living from its start to its end, counted under a coarser
// category (its user, or its own key). Instead of fractional shares the
// consumers here want a running tally per category — a user's "taskful"
// time is every period in which at least one of their attempts is live,
// counted in full — plus per-period membership changes so large result
// sets can be replayed without snapshotting every period.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

use super::engine::{sweep, SweepError};
use super::point::{ChroniclePoint, PointKind};

/// One entity's membership window: a task attempt under its category.
#[derive(Debug, Clone)]
pub struct PopulationSpan<C, E> {
    pub category: C,
    pub entity: E,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One period between consecutive population chronicle points.
///
/// `entered`/`left` record the entity transitions applied at this
/// period's opening point; `categories_entered`/`categories_left` record
/// categories whose live attempt count crossed zero there. Replaying the
/// change lists in order reconstructs the exact live sets of any period.
#[derive(Debug, Clone)]
pub struct PopulationPeriod<C, E> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
    pub live_entities: usize,
    pub live_categories: usize,
    pub entered: Vec<(C, E)>,
    pub left: Vec<(C, E)>,
    pub categories_entered: Vec<C>,
    pub categories_left: Vec<C>,
}

/// Full result of a population sweep.
#[derive(Debug, Clone)]
pub struct PopulationSweep<C, E> {
    pub periods: Vec<PopulationPeriod<C, E>>,
    /// Per-category time with at least one live entity, over the whole
    /// swept range.
    pub tally: BTreeMap<C, Duration>,
    /// Time with at least one live entity of any category.
    pub active: Duration,
}

/// Sweep a population of membership windows.
///
/// Spans with `end < start` are rejected upstream (a complete attempt
/// always closes at or after its start); `end == start` contributes its
/// boundary points but no measurable period.
pub fn sweep_population<C, E>(
    spans: &[PopulationSpan<C, E>],
) -> Result<PopulationSweep<C, E>, SweepError>
where
    C: Clone + Ord + Eq + Hash + Debug,
    E: Clone + Eq + Hash + Debug,
{
    let mut points = Vec::with_capacity(spans.len() * 2);
    for span in spans {
        points.push(ChroniclePoint::new(
            span.start,
            span.entity.clone(),
            span.category.clone(),
            PointKind::Started,
        ));
        points.push(ChroniclePoint::new(
            span.end,
            span.entity.clone(),
            span.category.clone(),
            PointKind::Ended,
        ));
    }
    points.sort_by_key(|p| p.at);

    // The engine re-sorts stably, so slices[i] pairs with points[i].
    let slices = sweep(points.clone())?;

    let mut live: HashMap<C, HashSet<E>> = HashMap::new();
    let mut periods = Vec::with_capacity(slices.len());
    let mut tally: BTreeMap<C, Duration> = BTreeMap::new();
    let mut active = Duration::zero();

    for (i, slice) in slices.iter().enumerate() {
        let point = &points[i];
        let mut entered = Vec::new();
        let mut left = Vec::new();
        let mut categories_entered = Vec::new();
        let mut categories_left = Vec::new();
        apply_change(
            &mut live,
            point,
            &mut entered,
            &mut left,
            &mut categories_entered,
            &mut categories_left,
        );

        let live_categories = slice
            .live
            .keys()
            .map(|(category, _)| category)
            .collect::<HashSet<_>>()
            .len();

        for (category, _) in slice.live.keys() {
            *tally.entry(category.clone()).or_insert_with(Duration::zero) += slice.duration;
        }
        if slice.total_live > 0 {
            active += slice.duration;
        }

        periods.push(PopulationPeriod {
            start: slice.start,
            end: slice.end,
            duration: slice.duration,
            live_entities: slice.total_live,
            live_categories,
            entered,
            left,
            categories_entered,
            categories_left,
        });
    }

    Ok(PopulationSweep {
        periods,
        tally,
        active,
    })
}

fn apply_change<C, E>(
    live: &mut HashMap<C, HashSet<E>>,
    point: &ChroniclePoint<C, E>,
    entered: &mut Vec<(C, E)>,
    left: &mut Vec<(C, E)>,
    categories_entered: &mut Vec<C>,
    categories_left: &mut Vec<C>,
) where
    C: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    let set = live.entry(point.category.clone()).or_default();
    match point.kind {
        PointKind::Started | PointKind::Created => {
            if set.insert(point.entity.clone()) {
                entered.push((point.category.clone(), point.entity.clone()));
                if set.len() == 1 {
                    categories_entered.push(point.category.clone());
                }
            }
        }
        PointKind::Ended => {
            if set.remove(&point.entity) {
                left.push((point.category.clone(), point.entity.clone()));
                if set.is_empty() {
                    categories_left.push(point.category.clone());
                }
            }
        }
    }
}

/// Replay the change lists of `periods[..=index]` to recover the exact
/// set of entities live during period `index`.
pub fn replay_live_entities<C, E>(
    periods: &[PopulationPeriod<C, E>],
    index: usize,
) -> HashSet<E>
where
    C: Clone,
    E: Clone + Eq + Hash,
{
    let mut set = HashSet::new();
    for period in &periods[..=index] {
        for (_, entity) in &period.entered {
            set.insert(entity.clone());
        }
        for (_, entity) in &period.left {
            set.remove(entity);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn span(user: &str, key: i64, start: i64, end: i64) -> PopulationSpan<String, i64> {
        PopulationSpan {
            category: user.to_string(),
            entity: key,
            start: ts(start),
            end: ts(end),
        }
    }

    #[test]
    fn test_empty_population() {
        let result = sweep_population::<String, i64>(&[]).unwrap();
        assert!(result.periods.is_empty());
        assert!(result.tally.is_empty());
        assert_eq!(result.active, Duration::zero());
    }

    #[test]
    fn test_single_attempt_tally() {
        let result = sweep_population(&[span("alice", 1, 0, 100)]).unwrap();
        assert_eq!(result.periods.len(), 1);
        assert_eq!(result.tally["alice"], Duration::seconds(100));
        assert_eq!(result.active, Duration::seconds(100));
    }

    #[test]
    fn test_overlapping_attempts_same_user_count_once() {
        // Two overlapping attempts of the same user: the user's taskful
        // time is wall-clock coverage, not a double-counted sum.
        let result =
            sweep_population(&[span("alice", 1, 0, 60), span("alice", 2, 30, 100)]).unwrap();
        assert_eq!(result.tally["alice"], Duration::seconds(100));
        assert_eq!(result.active, Duration::seconds(100));

        // Middle period holds both attempts but one user.
        let middle = &result.periods[1];
        assert_eq!(middle.live_entities, 2);
        assert_eq!(middle.live_categories, 1);
    }

    #[test]
    fn test_category_change_lists_cross_zero_only() {
        let result =
            sweep_population(&[span("alice", 1, 0, 60), span("alice", 2, 30, 100)]).unwrap();
        // Attempt 2 arriving does not re-enter the category.
        assert_eq!(result.periods[0].categories_entered, vec!["alice".to_string()]);
        assert_eq!(result.periods[1].entered.len(), 1);
        assert!(result.periods[1].categories_entered.is_empty());
        // Attempt 1 leaving does not exit the category while attempt 2 lives.
        assert!(result.periods[2].categories_left.is_empty());
    }

    #[test]
    fn test_two_users_with_gap() {
        let result =
            sweep_population(&[span("alice", 1, 0, 10), span("bob", 2, 40, 50)]).unwrap();
        assert_eq!(result.tally["alice"], Duration::seconds(10));
        assert_eq!(result.tally["bob"], Duration::seconds(10));
        // 10-40 is a dead period: counted in no tally, not active.
        assert_eq!(result.active, Duration::seconds(20));
        let dead = &result.periods[1];
        assert_eq!(dead.live_entities, 0);
        assert_eq!(dead.duration, Duration::seconds(30));
    }

    #[test]
    fn test_replay_matches_live_counts() {
        let spans = vec![
            span("alice", 1, 0, 60),
            span("bob", 2, 10, 30),
            span("alice", 3, 20, 80),
        ];
        let result = sweep_population(&spans).unwrap();
        for (i, period) in result.periods.iter().enumerate() {
            let replayed = replay_live_entities(&result.periods, i);
            assert_eq!(replayed.len(), period.live_entities, "period {i}");
        }
    }
}
