//! Rate and completion-time estimation

use chrono::{DateTime, Duration, Utc};
use ndarray::Array1;

use super::observation::Point;
use super::AnalysisError;

/// Default number of trailing intervals used for the average rate
pub const DEFAULT_ETA_WINDOW: usize = 200;

/// Default moving-average width for the smoothed rate
pub const DEFAULT_SMOOTHING_WINDOW: usize = 4;

/// Average rate of decrease over a time window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    /// Value lost per second; positive while the value is falling
    pub rate: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Projected completion time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaProjection {
    pub eta: DateTime<Utc>,
    pub remaining: Duration,
    pub rate: f64,
}

/// Smoothed instantaneous rate at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub timestamp: DateTime<Utc>,
    /// `None` where the moving average has no full window
    pub rate: Option<f64>,
}

/// Windowed rate estimator and ETA projector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateEstimator {
    window_size: usize,
}

impl RateEstimator {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Average rate over the last `window_size + 1` points
    pub fn estimate(&self, points: &[Point]) -> Result<RateEstimate, AnalysisError> {
        let start = points
            .len()
            .saturating_sub(self.window_size.saturating_add(1));
        let tail = &points[start..];
        let (first, last) = match (tail.first(), tail.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(AnalysisError::EmptySeries),
        };

        let seconds = seconds_between(first.timestamp, last.timestamp);
        if seconds <= 0.0 {
            return Err(AnalysisError::DegenerateWindow("zero-duration window"));
        }

        let rate = -(last.value as f64 - first.value as f64) / seconds;
        if rate <= 0.0 {
            return Err(AnalysisError::DegenerateWindow("no progress in window"));
        }

        Ok(RateEstimate {
            rate,
            window_start: first.timestamp,
            window_end: last.timestamp,
        })
    }

    /// Project when the value reaches zero at the current average rate
    pub fn project(&self, points: &[Point]) -> Result<EtaProjection, AnalysisError> {
        let estimate = self.estimate(points)?;
        let last = points.last().ok_or(AnalysisError::EmptySeries)?;

        let remaining_ms = (last.value as f64 / estimate.rate * 1000.0).round();
        let remaining = Some(remaining_ms)
            .filter(|ms| ms.is_finite() && *ms < i64::MAX as f64)
            .and_then(|ms| Duration::try_milliseconds(ms as i64))
            .ok_or(AnalysisError::DegenerateWindow("remaining time out of range"))?;

        let eta = last
            .timestamp
            .checked_add_signed(remaining)
            .ok_or(AnalysisError::DegenerateWindow("remaining time out of range"))?;

        Ok(EtaProjection {
            eta,
            remaining,
            rate: estimate.rate,
        })
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ETA_WINDOW)
    }
}

/// Centered moving average of the point-to-point rate of decrease.
///
/// Only falling intervals are averaged, so a reset never shows up as a
/// negative spike. Each rate is stamped with the later point of its interval.
pub fn smoothed_rate(points: &[Point], window: usize) -> Vec<RatePoint> {
    let window = window.max(1);

    let falling: Vec<(DateTime<Utc>, f64)> = points
        .windows(2)
        .filter_map(|pair| {
            let seconds = seconds_between(pair[0].timestamp, pair[1].timestamp);
            let derivative = (pair[1].value as f64 - pair[0].value as f64) / seconds;
            (seconds > 0.0 && derivative <= 0.0).then_some((pair[1].timestamp, -derivative))
        })
        .collect();

    let rates: Array1<f64> = falling.iter().map(|(_, rate)| *rate).collect();
    let mut smoothed: Vec<Option<f64>> = vec![None; rates.len()];
    if rates.len() >= window {
        for (start, view) in rates.windows(window).into_iter().enumerate() {
            smoothed[start + window / 2] = view.mean();
        }
    }

    falling
        .iter()
        .zip(smoothed)
        .map(|(&(timestamp, _), rate)| RatePoint { timestamp, rate })
        .collect()
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
