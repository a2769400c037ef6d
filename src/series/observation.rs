//! Observations and per-entity series
//!
//! Raw observations come out of the vision pipeline in any order and may
//! repeat. Before any filtering they are deduplicated, stripped of
//! unreadable values and grouped into one time-ordered series per entity.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of reading the digits of one region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reading {
    /// Digits decoded to this value
    Value(u64),
    /// Nothing digit-like was recognized
    Unreadable,
}

impl Reading {
    /// The decoded value, if any
    pub fn value(&self) -> Option<u64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Unreadable => None,
        }
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Reading::Unreadable)
    }
}

impl From<Option<u64>> for Reading {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Reading::Unreadable, Reading::Value)
    }
}

/// One reading of one entity at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Capture time of the screenshot
    pub timestamp: DateTime<Utc>,
    /// Boss/team/slot the value belongs to
    pub entity_id: String,
    /// Decoded value
    pub value: Reading,
    /// Screenshot the value was read from
    pub source: String,
}

/// A readable point of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: u64,
}

impl Point {
    pub fn new(timestamp: DateTime<Utc>, value: u64) -> Self {
        Self { timestamp, value }
    }
}

/// Time-ordered points of a single entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySeries {
    pub entity_id: String,
    pub points: Vec<Point>,
}

impl EntitySeries {
    /// Create an empty series
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            points: Vec::new(),
        }
    }

    /// Create a series from points already in time order
    pub fn from_points(entity_id: &str, points: Vec<Point>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            points,
        }
    }

    /// Same entity, different points
    pub fn with_points(&self, points: Vec<Point>) -> Self {
        Self::from_points(&self.entity_id, points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<u64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }
}

/// Drop repeated `(entity_id, source)` pairs, keeping the first seen
pub fn dedup_observations(observations: &[Observation]) -> Vec<Observation> {
    let mut seen = HashSet::new();
    observations
        .iter()
        .filter(|o| seen.insert((o.entity_id.as_str(), o.source.as_str())))
        .cloned()
        .collect()
}

/// Merge observations decoded in any order into a deterministic sequence:
/// sorted by (timestamp, entity, source), repeated `(entity_id, source)`
/// pairs removed
pub fn merge_observations(mut observations: Vec<Observation>) -> Vec<Observation> {
    observations.sort_by(|a, b| {
        (a.timestamp, &a.entity_id, &a.source).cmp(&(b.timestamp, &b.entity_id, &b.source))
    });
    dedup_observations(&observations)
}

/// Group observations into one series per entity.
///
/// Applies the keep-first `(entity_id, source)` dedup, drops unreadable
/// values, orders points by time and keeps the first point of any repeated
/// timestamp.
pub fn group_by_entity(observations: &[Observation]) -> BTreeMap<String, EntitySeries> {
    let mut groups: BTreeMap<String, EntitySeries> = BTreeMap::new();

    for observation in dedup_observations(observations) {
        let Some(value) = observation.value.value() else {
            continue;
        };
        groups
            .entry(observation.entity_id.clone())
            .or_insert_with(|| EntitySeries::new(&observation.entity_id))
            .points
            .push(Point::new(observation.timestamp, value));
    }

    for series in groups.values_mut() {
        // Stable sort keeps first-seen order among equal timestamps
        series.points.sort_by_key(|p| p.timestamp);
        series.points.dedup_by_key(|p| p.timestamp);
    }

    groups
}
