// Sweep-line decomposition of overlapping entity lifetimes.
//
// Given chronicle points for many concurrently-live entities, the sweep
// sorts them by time and scans once, emitting the non-overlapping slices
// between consecutive points together with a snapshot of how many entities
// each (category, phase) pair holds during the slice. Aggregate counts are
// all downstream attribution needs, so the scan never enumerates entity
// pairings: O(N log N) to sort, O(N) to scan.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::point::{ChroniclePoint, Phase, PointKind};

/// Errors surfaced by a single sweep call.
///
/// These indicate malformed input (a data-integrity problem at the
/// provider), never a recoverable condition: callers propagate them and
/// exclude the offending entity from the wider run.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("{count} entities still live after the final chronicle point: {sample}")]
    EntitiesLeftLive { count: usize, sample: String },
}

/// One non-overlapping slice of the swept timeline.
///
/// `live` holds the per-(category, phase) entity counts in effect for the
/// whole slice, i.e. the snapshot taken right after the slice's opening
/// point applied its transition. Only non-zero counts are recorded.
#[derive(Debug, Clone)]
pub struct IntervalSlice<C: Ord> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
    pub live: BTreeMap<(C, Phase), usize>,
    pub total_live: usize,
}

impl<C: Ord> IntervalSlice<C> {
    pub fn live_count(&self, category: &C, phase: Phase) -> usize
    where
        C: Clone,
    {
        self.live
            .get(&(category.clone(), phase))
            .copied()
            .unwrap_or(0)
    }

    /// Fair share of this slice's duration owned by one (category, phase),
    /// in seconds. Zero when nothing is live.
    pub fn share_secs(&self, category: &C, phase: Phase) -> f64
    where
        C: Clone,
    {
        if self.total_live == 0 {
            return 0.0;
        }
        let n = self.live_count(category, phase);
        duration_secs(self.duration) * n as f64 / self.total_live as f64
    }
}

/// Per-category wait/run membership books.
struct LiveBook<C, E> {
    sets: HashMap<C, [HashSet<E>; 2]>,
}

impl<C, E> LiveBook<C, E>
where
    C: Clone + Eq + Hash,
    E: Clone + Eq + Hash + Debug,
{
    fn new() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    fn apply(&mut self, point: &ChroniclePoint<C, E>) {
        let slot = self
            .sets
            .entry(point.category.clone())
            .or_insert_with(|| [HashSet::new(), HashSet::new()]);
        match point.kind {
            PointKind::Created => {
                slot[Phase::Wait as usize].insert(point.entity.clone());
            }
            PointKind::Started => {
                slot[Phase::Wait as usize].remove(&point.entity);
                slot[Phase::Run as usize].insert(point.entity.clone());
            }
            PointKind::Ended => {
                // Discard semantics: an end for an entity that never
                // entered (its creation predates the swept window) is
                // tolerated; leftovers are caught by ensure_drained.
                slot[Phase::Wait as usize].remove(&point.entity);
                slot[Phase::Run as usize].remove(&point.entity);
            }
        }
    }

    fn total(&self) -> usize {
        self.sets
            .values()
            .map(|s| s[0].len() + s[1].len())
            .sum()
    }

    fn snapshot(&self) -> BTreeMap<(C, Phase), usize>
    where
        C: Ord,
    {
        let mut counts = BTreeMap::new();
        for (category, slot) in &self.sets {
            for phase in Phase::ALL {
                let n = slot[phase as usize].len();
                if n > 0 {
                    counts.insert((category.clone(), phase), n);
                }
            }
        }
        counts
    }

    fn ensure_drained(&self) -> Result<(), SweepError> {
        let count = self.total();
        if count == 0 {
            return Ok(());
        }
        let mut sample: Vec<String> = self
            .sets
            .values()
            .flat_map(|s| s.iter().flatten())
            .take(8)
            .map(|e| format!("{e:?}"))
            .collect();
        sample.sort();
        Err(SweepError::EntitiesLeftLive {
            count,
            sample: sample.join(", "),
        })
    }
}

/// Decompose a set of chronicle points into ordered interval slices.
///
/// Points are stably sorted by timestamp (ties keep input order), then
/// scanned once; each consecutive pair yields one slice carrying the
/// live-count snapshot in effect between them. After the final point has
/// applied its transition every live set must be empty — a leftover
/// entity means its start marker never met a matching end, and the whole
/// call fails rather than silently truncating.
///
/// Fewer than two points yield no slices (but a single unmatched start
/// still fails the drain check).
pub fn sweep<C, E>(
    mut points: Vec<ChroniclePoint<C, E>>,
) -> Result<Vec<IntervalSlice<C>>, SweepError>
where
    C: Clone + Ord + Eq + Hash,
    E: Clone + Eq + Hash + Debug,
{
    points.sort_by_key(|p| p.at);

    let mut book: LiveBook<C, E> = LiveBook::new();
    let mut slices = Vec::with_capacity(points.len().saturating_sub(1));

    for (i, point) in points.iter().enumerate() {
        book.apply(point);
        if let Some(next) = points.get(i + 1) {
            slices.push(IntervalSlice {
                start: point.at,
                end: next.at,
                duration: next.at - point.at,
                live: book.snapshot(),
                total_live: book.total(),
            });
        }
    }

    book.ensure_drained()?;
    Ok(slices)
}

/// Duration as fractional seconds, microsecond precision.
pub fn duration_secs(d: Duration) -> f64 {
    d.num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| d.num_milliseconds() as f64 / 1e3)
}
