// Chronicle points: the timestamped events the sweep consumes.
//
// A chronicle point marks the moment an entity (a job, a task attempt)
// changes its membership in some category's live set. Points are ordered
// by timestamp only; ties keep their input order so sweep results stay
// deterministic.

use std::fmt;

use chrono::{DateTime, Utc};

/// Which sub-phase of its lifetime an entity currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Queued: created but not yet started.
    Wait,
    /// Actively executing.
    Run,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Wait, Phase::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Wait => "wait",
            Phase::Run => "run",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition a chronicle point applies to its entity.
///
/// The set of kinds is closed: every provider marker must be mapped onto
/// one of these three transitions before the sweep runs, so an
/// unrecognized marker cannot reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    /// The entity enters its category's wait set.
    Created,
    /// The entity moves from the wait set to the run set.
    Started,
    /// The entity leaves both sets.
    Ended,
}

/// A single timestamped membership change.
///
/// `C` is the category the entity is counted under (a final job status, a
/// user name); `E` identifies the entity itself. Categories are fixed per
/// entity for the lifetime of a sweep.
#[derive(Debug, Clone)]
pub struct ChroniclePoint<C, E> {
    pub at: DateTime<Utc>,
    pub entity: E,
    pub category: C,
    pub kind: PointKind,
}

impl<C, E> ChroniclePoint<C, E> {
    pub fn new(at: DateTime<Utc>, entity: E, category: C, kind: PointKind) -> Self {
        Self {
            at,
            entity,
            category,
            kind,
        }
    }
}

impl<C: fmt::Debug, E: fmt::Debug> fmt::Display for ChroniclePoint<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(at={}, entity={:?}, kind={:?}, category={:?})",
            self.at, self.entity, self.kind, self.category
        )
    }
}
