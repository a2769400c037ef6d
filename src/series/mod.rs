//! Time-series analysis module
//!
//! Turns raw observations into clean per-entity series, phases and
//! completion-time estimates. Every run recomputes everything from the full
//! observation history; nothing is carried over between runs.

pub mod filter;
pub mod monotonic;
pub mod observation;
pub mod phase;
pub mod rate;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::Settings;

pub use filter::{RobustFilter, SanityCheck};
pub use observation::{
    group_by_entity, merge_observations, EntitySeries, Observation, Point, Reading,
};
pub use phase::{Phase, PhaseSegmenter};
pub use rate::{EtaProjection, RateEstimate, RateEstimator, RatePoint};

/// Analysis result for one entity
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub entity_id: String,
    /// Readable points before any cleaning
    pub raw_points: usize,
    /// Series after sanity checks and outlier rejection
    pub filtered: EntitySeries,
    /// Phases with the non-increasing trend enforced
    pub phases: Vec<Phase>,
    /// Projection for the current (last) phase
    pub projection: Result<EtaProjection, AnalysisError>,
    /// Smoothed rate of the current phase
    pub rate_trend: Vec<RatePoint>,
}

impl EntityReport {
    /// The phase the entity is currently in
    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.last()
    }

    /// Most recent filtered value
    pub fn latest_value(&self) -> Option<u64> {
        self.filtered.last().map(|p| p.value)
    }
}

/// Runs the cleaning, segmentation and estimation chain per entity
#[derive(Debug, Clone)]
pub struct SeriesAnalyzer {
    sanity: SanityCheck,
    filter: RobustFilter,
    monotonic_passes: usize,
    reset_threshold: u64,
    reference_starts: BTreeMap<String, Vec<DateTime<Utc>>>,
    estimator: RateEstimator,
    smoothing_window: usize,
}

impl SeriesAnalyzer {
    /// Create an analyzer with default parameters and the given reset threshold
    pub fn new(reset_threshold: u64) -> Self {
        Self {
            sanity: SanityCheck::default(),
            filter: RobustFilter::default(),
            monotonic_passes: monotonic::MONOTONIC_PASSES,
            reset_threshold,
            reference_starts: BTreeMap::new(),
            estimator: RateEstimator::default(),
            smoothing_window: rate::DEFAULT_SMOOTHING_WINDOW,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.phases.reset_threshold)
            .with_sanity(SanityCheck::new(
                settings.filter.min_value,
                settings.filter.excluded_values.clone(),
            ))
            .with_filter(RobustFilter::new(settings.filter.window, settings.filter.offset))
            .with_reference_starts(settings.phases.reference_starts.clone())
            .with_estimator(RateEstimator::new(settings.eta.window))
            .with_smoothing_window(settings.eta.smoothing_window)
    }

    pub fn with_sanity(mut self, sanity: SanityCheck) -> Self {
        self.sanity = sanity;
        self
    }

    pub fn with_filter(mut self, filter: RobustFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_reference_starts(mut self, starts: BTreeMap<String, Vec<DateTime<Utc>>>) -> Self {
        self.reference_starts = starts;
        self
    }

    pub fn with_estimator(mut self, estimator: RateEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_smoothing_window(mut self, window: usize) -> Self {
        self.smoothing_window = window;
        self
    }

    /// Segmenter for one entity, carrying its known phase start times
    pub fn segmenter_for(&self, entity_id: &str) -> PhaseSegmenter {
        let starts = self
            .reference_starts
            .get(entity_id)
            .cloned()
            .unwrap_or_default();
        PhaseSegmenter::new(self.reset_threshold).with_reference_starts(starts)
    }

    /// Analyze one entity's series.
    ///
    /// Order: sanity checks, robust filter, phase segmentation, then the
    /// monotonic pass inside each phase. The projection comes from the last
    /// phase; its failure is kept in the report rather than returned.
    pub fn analyze_series(&self, series: &EntitySeries) -> Result<EntityReport, AnalysisError> {
        let sane = self.sanity.apply(series);
        let filtered = self.filter.filter(&sane);
        if filtered.is_empty() {
            return Err(AnalysisError::EmptySeries);
        }

        let phases: Vec<Phase> = self
            .segmenter_for(&series.entity_id)
            .segment(&filtered)
            .into_iter()
            .map(|phase| {
                let points =
                    monotonic::enforce_passes(&phase.series(), self.monotonic_passes).points;
                Phase { points, ..phase }
            })
            .collect();

        let current = phases
            .last()
            .map(|p| p.points.as_slice())
            .unwrap_or_default();
        let projection = self.estimator.project(current);
        let rate_trend = rate::smoothed_rate(current, self.smoothing_window);

        log::debug!(
            "{}: {} raw, {} filtered, {} phases",
            series.entity_id,
            series.len(),
            filtered.len(),
            phases.len()
        );

        Ok(EntityReport {
            entity_id: series.entity_id.clone(),
            raw_points: series.len(),
            filtered,
            phases,
            projection,
            rate_trend,
        })
    }

    /// Analyze every entity present in the observations.
    ///
    /// Failures are per entity; one entity without enough data does not
    /// affect the others.
    pub fn analyze(
        &self,
        observations: &[Observation],
    ) -> BTreeMap<String, Result<EntityReport, AnalysisError>> {
        group_by_entity(observations)
            .into_iter()
            .map(|(entity_id, series)| {
                let report = self.analyze_series(&series);
                if let Err(ref e) = report {
                    log::info!("{}: {}", entity_id, e);
                }
                (entity_id, report)
            })
            .collect()
    }
}

impl Default for SeriesAnalyzer {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

/// Value every entity is currently stuck at, if there is one that has not
/// been reported yet.
///
/// Values listed in `already_alerted` are ignored when looking up each
/// entity's latest value.
pub fn common_stall(
    reports: &BTreeMap<String, Result<EntityReport, AnalysisError>>,
    already_alerted: &[u64],
) -> Option<u64> {
    let latest: HashSet<u64> = reports
        .values()
        .filter_map(|report| report.as_ref().ok())
        .filter_map(|report| {
            report
                .filtered
                .points
                .iter()
                .rev()
                .map(|p| p.value)
                .find(|value| !already_alerted.contains(value))
        })
        .collect();

    match latest.len() {
        1 => latest.into_iter().next(),
        _ => None,
    }
}

/// Analysis errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("No usable points in series")]
    EmptySeries,
    #[error("Rate window is degenerate: {0}")]
    DegenerateWindow(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(secs: i64, entity: &str, value: u64) -> Observation {
        Observation {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            entity_id: entity.to_string(),
            value: Reading::Value(value),
            source: format!("{}.png", secs),
        }
    }

    fn falling(entity: &str, start: u64, step: u64, count: i64) -> Vec<Observation> {
        (0..count)
            .map(|i| obs(i * 60, entity, start - step * i as u64))
            .collect()
    }

    #[test]
    fn test_end_to_end_projection() {
        let mut observations = falling("boss", 100_000, 1_000, 20);
        // A misread and an unreadable frame
        observations[8].value = Reading::Value(7);
        observations[12].value = Reading::Unreadable;

        let reports = SeriesAnalyzer::default().analyze(&observations);
        let report = reports["boss"].as_ref().unwrap();

        assert_eq!(report.raw_points, 19);
        assert_eq!(report.filtered.len(), 18);
        assert_eq!(report.phases.len(), 1);

        let projection = report.projection.as_ref().unwrap();
        // 1000 per minute
        assert!((projection.rate - 1000.0 / 60.0).abs() < 1e-9);
        // 81000 left at 19 minutes
        assert_eq!(projection.eta, Utc.timestamp_opt(19 * 60 + 81 * 60, 0).unwrap());
    }

    #[test]
    fn test_reset_starts_new_phase() {
        let mut observations = falling("oni", 50_000, 1_000, 10);
        observations.extend((0..10).map(|i| obs(600 + i * 60, "oni", 900_000 - 2_000 * i as u64)));

        let analyzer = SeriesAnalyzer::new(100_000);
        let reports = analyzer.analyze(&observations);
        let report = reports["oni"].as_ref().unwrap();

        assert_eq!(report.phases.len(), 2);
        assert_eq!(report.current_phase().unwrap().first().unwrap().value, 900_000);
        let projection = report.projection.as_ref().unwrap();
        assert!((projection.rate - 2_000.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_are_per_entity() {
        let mut observations = falling("healthy", 100_000, 1_000, 10);
        observations.extend(falling("sparse", 5_000, 100, 3));

        let reports = SeriesAnalyzer::default().analyze(&observations);
        assert!(reports["healthy"].is_ok());
        assert_eq!(reports["sparse"].as_ref().unwrap_err(), &AnalysisError::EmptySeries);
    }

    #[test]
    fn test_stalled_projection_is_soft() {
        let observations: Vec<Observation> = (0..8).map(|i| obs(i * 60, "boss", 4_200)).collect();

        let reports = SeriesAnalyzer::default().analyze(&observations);
        let report = reports["boss"].as_ref().unwrap();
        assert!(matches!(report.projection, Err(AnalysisError::DegenerateWindow(_))));
    }

    #[test]
    fn test_sanity_values_from_settings() {
        let analyzer = SeriesAnalyzer::default().with_sanity(SanityCheck::new(1000, vec![]));
        let observations = falling("boss", 1_020, 1, 25);

        let reports = analyzer.analyze(&observations);
        let report = reports["boss"].as_ref().unwrap();
        assert_eq!(report.filtered.len(), 21);
        assert!(report.filtered.values().iter().all(|&v| v >= 1000));
    }

    #[test]
    fn test_common_stall() {
        let mut observations: Vec<Observation> =
            (0..8).map(|i| obs(i * 60, "Karna", 600 - i as u64)).collect();
        observations.extend((0..8).map(|i| obs(i * 60 + 1, "Jack", 700 - 14 * i as u64)));

        let analyzer = SeriesAnalyzer::default().with_filter(RobustFilter::new(1, 0.0));
        let reports = analyzer.analyze(&observations);
        // Karna ends at 593, Jack at 602
        assert_eq!(common_stall(&reports, &[]), None);

        observations.push(obs(1000, "Karna", 500));
        observations.push(obs(1000, "Jack", 500));
        let reports = analyzer.analyze(&observations);
        assert_eq!(common_stall(&reports, &[]), Some(500));
        // Already reported: fall back to the previous latest values
        assert_eq!(common_stall(&reports, &[500]), None);
    }
}
