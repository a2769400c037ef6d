//! Non-increasing trend enforcement
//!
//! Within a phase the tracked value only goes down. Any point lower than its
//! successor is treated as a misread and dropped. Each pass compares every
//! point against its successor in the series as it stood at the start of the
//! pass, so a run of `k` bad points needs `k` passes to clear.

use super::observation::{EntitySeries, Point};

/// Number of passes applied by [`enforce`]. Historical outputs were produced
/// with this count; a series with more stacked violations keeps some of them.
pub const MONOTONIC_PASSES: usize = 5;

/// Apply [`MONOTONIC_PASSES`] passes
pub fn enforce(series: &EntitySeries) -> EntitySeries {
    enforce_passes(series, MONOTONIC_PASSES)
}

/// Apply a fixed number of passes. The last point always survives.
pub fn enforce_passes(series: &EntitySeries, passes: usize) -> EntitySeries {
    let mut points = series.points.clone();

    for _ in 0..passes {
        let before = points.len();
        points = single_pass(&points);
        if points.len() == before {
            break;
        }
    }

    series.with_points(points)
}

fn single_pass(points: &[Point]) -> Vec<Point> {
    points
        .iter()
        .enumerate()
        .filter(|(i, point)| points.get(i + 1).is_none_or(|next| point.value >= next.value))
        .map(|(_, point)| *point)
        .collect()
}

/// Number of adjacent pairs where the value goes up
pub fn count_violations(series: &EntitySeries) -> usize {
    series
        .points
        .windows(2)
        .filter(|pair| pair[0].value < pair[1].value)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(values: &[u64]) -> EntitySeries {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Point::new(Utc.timestamp_opt(i as i64 * 30, 0).unwrap(), v))
            .collect();
        EntitySeries::from_points("boss", points)
    }

    #[test]
    fn test_drops_isolated_dip() {
        let cleaned = enforce(&series(&[100, 90, 20, 80, 70]));
        assert_eq!(cleaned.values(), vec![100, 90, 80, 70]);
        assert_eq!(count_violations(&cleaned), 0);
    }

    #[test]
    fn test_equal_values_survive() {
        let cleaned = enforce(&series(&[50, 50, 40, 40]));
        assert_eq!(cleaned.values(), vec![50, 50, 40, 40]);
    }

    #[test]
    fn test_pass_limit_leaves_violations() {
        // Seven stacked points below the final reading: five passes remove
        // only the five closest to it
        let input = series(&[7, 6, 5, 4, 3, 2, 1, 8]);
        assert_eq!(count_violations(&input), 1);

        let cleaned = enforce(&input);
        assert_eq!(cleaned.values(), vec![7, 6, 8]);
        assert_eq!(count_violations(&cleaned), 1);
    }

    #[test]
    fn test_more_passes_remove_more() {
        let input = series(&[7, 6, 5, 4, 3, 2, 1, 8]);
        let cleaned = enforce_passes(&input, 7);
        assert_eq!(cleaned.values(), vec![8]);
    }

    #[test]
    fn test_last_point_always_kept() {
        let cleaned = enforce(&series(&[1, 2]));
        assert_eq!(cleaned.values(), vec![2]);
        assert!(enforce(&series(&[])).is_empty());
    }
}
