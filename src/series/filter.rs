//! Outlier rejection
//!
//! OCR misreads show up as isolated spikes or dips. They are removed with a
//! centered rolling median / median-absolute-deviation band, after a cheap
//! sanity pass that drops known garbage readings.

use ndarray::{Array1, ArrayView1};

use super::observation::{EntitySeries, Point};

/// Default rolling window, in points
pub const DEFAULT_WINDOW: usize = 7;

/// Default band half-width, in MADs
pub const DEFAULT_OFFSET: f64 = 3.0;

/// Centered rolling median/MAD filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustFilter {
    window: usize,
    offset: f64,
}

impl RobustFilter {
    /// Create a filter with the given window and offset.
    ///
    /// A zero window is treated as a window of one point.
    pub fn new(window: usize, offset: f64) -> Self {
        Self {
            window: window.max(1),
            offset,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Keep the points within `median ± offset·MAD` of their window.
    ///
    /// Edge points borrow the statistics of the nearest full window. A
    /// series shorter than the window has no full window; its median and MAD
    /// are 0, so only zero values survive.
    pub fn filter(&self, series: &EntitySeries) -> EntitySeries {
        let values: Array1<f64> = series.points.iter().map(|p| p.value as f64).collect();
        let (medians, mads) = self.rolling_stats(values.view());

        let kept: Vec<Point> = series
            .points
            .iter()
            .zip(medians.iter().zip(mads.iter()))
            .filter_map(|(point, (&median, &mad))| {
                let value = point.value as f64;
                let band = self.offset * mad;
                (median - band <= value && value <= median + band).then_some(*point)
            })
            .collect();

        let rejected = series.len() - kept.len();
        if rejected > 0 {
            log::debug!("{}: rejected {} of {} points", series.entity_id, rejected, series.len());
        }

        series.with_points(kept)
    }

    /// Per-point rolling median and MAD, edge-filled
    fn rolling_stats(&self, values: ArrayView1<f64>) -> (Vec<f64>, Vec<f64>) {
        let n = values.len();
        let mut medians: Vec<Option<f64>> = vec![None; n];
        let mut mads: Vec<Option<f64>> = vec![None; n];

        if n >= self.window {
            let center = self.window / 2;
            for (start, window) in values.windows(self.window).into_iter().enumerate() {
                let median = median(window.iter().copied());
                let mad = median_abs_deviation(window, median);
                medians[start + center] = Some(median);
                mads[start + center] = Some(mad);
            }
        }

        (fill_edges(medians), fill_edges(mads))
    }
}

impl Default for RobustFilter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_OFFSET)
    }
}

/// Median of the values, 0 when there are none
fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn median_abs_deviation(window: ArrayView1<f64>, center: f64) -> f64 {
    median(window.iter().map(|v| (v - center).abs()))
}

/// Forward fill, then backward fill, then zero
fn fill_edges(stats: Vec<Option<f64>>) -> Vec<f64> {
    let mut filled = stats;

    let mut last = None;
    for slot in filled.iter_mut() {
        match *slot {
            Some(v) => last = Some(v),
            None => *slot = last,
        }
    }

    let mut next = None;
    for slot in filled.iter_mut().rev() {
        match *slot {
            Some(v) => next = Some(v),
            None => *slot = next,
        }
    }

    filled.into_iter().map(|v| v.unwrap_or(0.0)).collect()
}

/// Drops readings that are never plausible for the tracked value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanityCheck {
    /// Readings below this are discarded
    pub min_value: u64,
    /// Readings equal to any of these are discarded
    pub excluded: Vec<u64>,
}

impl SanityCheck {
    pub fn new(min_value: u64, excluded: Vec<u64>) -> Self {
        Self { min_value, excluded }
    }

    pub fn accepts(&self, value: u64) -> bool {
        value >= self.min_value && !self.excluded.contains(&value)
    }

    pub fn apply(&self, series: &EntitySeries) -> EntitySeries {
        let kept = series
            .points
            .iter()
            .copied()
            .filter(|p| self.accepts(p.value))
            .collect();
        series.with_points(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(values: &[u64]) -> EntitySeries {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Point::new(Utc.timestamp_opt(1_000 + i as i64 * 60, 0).unwrap(), v))
            .collect();
        EntitySeries::from_points("boss", points)
    }

    #[test]
    fn test_rejects_single_misread() {
        let filter = RobustFilter::default();
        let filtered = filter.filter(&series(&[100, 99, 98, 1, 97, 96, 95]));
        assert_eq!(filtered.values(), vec![100, 99, 98, 97, 96, 95]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let mut values: Vec<u64> = (0..12).map(|i| 1000 - 10 * i).collect();
        values[5] = 5000;

        let filter = RobustFilter::default();
        let once = filter.filter(&series(&values));
        assert_eq!(once.len(), 11);
        assert!(!once.values().contains(&5000));

        let twice = filter.filter(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_keeps_timestamps_of_survivors() {
        let input = series(&[100, 99, 98, 1, 97, 96, 95]);
        let filtered = RobustFilter::default().filter(&input);
        assert_eq!(filtered.points[3].timestamp, input.points[4].timestamp);
    }

    #[test]
    fn test_short_series_has_no_full_window() {
        let filtered = RobustFilter::default().filter(&series(&[100, 99, 98]));
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_empty_series() {
        let filtered = RobustFilter::default().filter(&series(&[]));
        assert!(filtered.is_empty());
        assert_eq!(filtered.entity_id, "boss");
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median([3.0, 1.0, 2.0].into_iter()), 2.0);
        assert_eq!(median([4.0, 1.0, 3.0, 2.0].into_iter()), 2.5);
        assert_eq!(median(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_fill_edges() {
        let filled = fill_edges(vec![None, Some(2.0), None, Some(4.0), None]);
        assert_eq!(filled, vec![2.0, 2.0, 2.0, 4.0, 4.0]);
        assert_eq!(fill_edges(vec![None, None]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_sanity_check() {
        let check = SanityCheck::new(1000, vec![3]);
        let cleaned = check.apply(&series(&[5000, 3, 999, 1000, 4000]));
        assert_eq!(cleaned.values(), vec![5000, 1000, 4000]);

        let lenient = SanityCheck::new(0, vec![3]);
        assert!(!lenient.accepts(3));
        assert!(lenient.accepts(0));
    }
}
