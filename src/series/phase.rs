//! Phase segmentation
//!
//! A new boss or stage shows up as a large upward jump in the tracked
//! value. Each such jump starts a new phase.

use chrono::{DateTime, Utc};

use super::observation::{EntitySeries, Point};

/// Contiguous span of one entity's series between two resets
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub entity_id: String,
    /// Zero-based position among the entity's phases
    pub index: usize,
    /// Time of the phase's first point
    pub start_time: DateTime<Utc>,
    /// Externally known start of this phase, if configured
    pub reference_start_time: Option<DateTime<Utc>>,
    pub points: Vec<Point>,
}

impl Phase {
    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The phase's points as a standalone series
    pub fn series(&self) -> EntitySeries {
        EntitySeries::from_points(&self.entity_id, self.points.clone())
    }

    /// Start used for elapsed-time reporting
    pub fn effective_start(&self) -> DateTime<Utc> {
        self.reference_start_time.unwrap_or(self.start_time)
    }

    /// Hours elapsed between the phase start and `at`
    pub fn hours_since_start(&self, at: DateTime<Utc>) -> f64 {
        (at - self.effective_start()).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Splits a series at upward jumps larger than the reset threshold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseSegmenter {
    reset_threshold: u64,
    /// Known phase start times, by phase index
    reference_starts: Vec<DateTime<Utc>>,
}

impl PhaseSegmenter {
    pub fn new(reset_threshold: u64) -> Self {
        Self {
            reset_threshold,
            reference_starts: Vec::new(),
        }
    }

    /// Attach known start times; the n-th entry belongs to phase n
    pub fn with_reference_starts(mut self, starts: Vec<DateTime<Utc>>) -> Self {
        self.reference_starts = starts;
        self
    }

    pub fn reset_threshold(&self) -> u64 {
        self.reset_threshold
    }

    /// Split the series into phases.
    ///
    /// The first phase starts at the first point. A point starts a new phase
    /// when it exceeds its predecessor by more than the threshold. An empty
    /// series has no phases.
    pub fn segment(&self, series: &EntitySeries) -> Vec<Phase> {
        let mut phases: Vec<Phase> = Vec::new();
        let mut current: Vec<Point> = Vec::new();

        for point in &series.points {
            let is_reset = current
                .last()
                .is_some_and(|prev| point.value.saturating_sub(prev.value) > self.reset_threshold);

            if is_reset {
                log::debug!(
                    "{}: reset at {} ({} -> {})",
                    series.entity_id,
                    point.timestamp,
                    current.last().map_or(0, |p| p.value),
                    point.value
                );
                let points = std::mem::take(&mut current);
                phases.extend(self.make_phase(&series.entity_id, phases.len(), points));
            }
            current.push(*point);
        }

        phases.extend(self.make_phase(&series.entity_id, phases.len(), current));

        phases
    }

    fn make_phase(&self, entity_id: &str, index: usize, points: Vec<Point>) -> Option<Phase> {
        let start_time = points.first()?.timestamp;
        Some(Phase {
            entity_id: entity_id.to_string(),
            index,
            start_time,
            reference_start_time: self.reference_starts.get(index).copied(),
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(values: &[u64]) -> EntitySeries {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Point::new(Utc.timestamp_opt(i as i64 * 600, 0).unwrap(), v))
            .collect();
        EntitySeries::from_points("oni", points)
    }

    fn values(phase: &Phase) -> Vec<u64> {
        phase.points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn test_two_phases() {
        let phases = PhaseSegmenter::new(200).segment(&series(&[100, 95, 90, 500, 480, 470]));

        assert_eq!(phases.len(), 2);
        assert_eq!(values(&phases[0]), vec![100, 95, 90]);
        assert_eq!(values(&phases[1]), vec![500, 480, 470]);
        assert_eq!(phases[1].index, 1);
        assert_eq!(phases[1].start_time, Utc.timestamp_opt(1800, 0).unwrap());
    }

    #[test]
    fn test_jump_at_threshold_is_not_a_reset() {
        let phases = PhaseSegmenter::new(200).segment(&series(&[100, 300, 250]));
        assert_eq!(phases.len(), 1);
    }

    #[test]
    fn test_no_reset_single_phase() {
        let input = series(&[100, 90, 80]);
        let phases = PhaseSegmenter::new(200).segment(&input);

        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].points, input.points);
        assert!(PhaseSegmenter::new(200).segment(&series(&[])).is_empty());
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let input = series(&[900, 10, 5000, 4000, 20, 6000, 5900]);
        let segmenter = PhaseSegmenter::new(1000);

        let first = segmenter.segment(&input);
        let second = segmenter.segment(&input);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_reference_start_times() {
        let reference = Utc.timestamp_opt(1200, 0).unwrap();
        let phases = PhaseSegmenter::new(200)
            .with_reference_starts(vec![Utc.timestamp_opt(-3600, 0).unwrap(), reference])
            .segment(&series(&[100, 95, 90, 500, 480, 470]));

        assert_eq!(phases[1].reference_start_time, Some(reference));
        assert_eq!(phases[1].effective_start(), reference);
        // Last point at 3000s, reference start at 1200s
        let last = phases[1].last().unwrap().timestamp;
        assert!((phases[1].hours_since_start(last) - 0.5).abs() < 1e-9);
        assert!((phases[0].hours_since_start(phases[0].start_time) - 1.0).abs() < 1e-9);
    }
}
