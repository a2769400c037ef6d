//! Human-readable reports
//!
//! The ETA summary is rewritten on every run, the ETA history grows by one
//! line per run, and the alert log remembers stall values already reported.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, Utc};

use super::{ensure_parent, StoreError};
use crate::series::{AnalysisError, EntityReport, Phase};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a duration as `<h>h <m>m <s>s`
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    format!("{}h {:02}m {:02}s", total / 3600, (total % 3600) / 60, total % 60)
}

fn local(time: DateTime<Utc>, offset: FixedOffset) -> String {
    time.with_timezone(&offset).format(TIME_FORMAT).to_string()
}

/// One line per phase: index, first value, point count, start, end, and
/// hours elapsed since the phase started
pub fn format_phases(phases: &[Phase], offset: FixedOffset) -> String {
    let mut out = String::new();
    for phase in phases {
        let (Some(first), Some(last)) = (phase.first(), phase.last()) else {
            continue;
        };
        let _ = writeln!(
            out,
            "{} {} {:4} {} {} ({:.1}h)",
            phase.index,
            first.value,
            phase.len(),
            local(first.timestamp, offset),
            local(last.timestamp, offset),
            phase.hours_since_start(last.timestamp)
        );
    }
    out
}

/// Summary of every entity's projection
pub fn format_summary(
    reports: &BTreeMap<String, Result<EntityReport, AnalysisError>>,
    update_time: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Updated: {} (UTC{})", local(update_time, offset), offset);

    for (entity_id, report) in reports {
        let _ = writeln!(out, "\n[{}]", entity_id);
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let _ = writeln!(out, "No estimate: {}", e);
                continue;
            }
        };

        if let Some(value) = report.latest_value() {
            let _ = writeln!(out, "HP: {}", value);
        }
        match &report.projection {
            Ok(projection) => {
                let _ = writeln!(out, "DPS: {:.0}", projection.rate);
                let _ = writeln!(out, "Remaining: {}", format_remaining(projection.remaining));
                let _ = writeln!(out, "ETA: {}", local(projection.eta, offset));
            }
            Err(e) => {
                let _ = writeln!(out, "ETA: not yet computable ({})", e);
            }
        }
        out.push_str(&format_phases(&report.phases, offset));
    }

    out
}

/// Overwrite the summary file
pub fn write_summary(path: &Path, summary: &str) -> Result<(), StoreError> {
    ensure_parent(path)?;
    fs::write(path, summary).map_err(StoreError::io(path))
}

/// Append an `update_time,entity,eta` line to the ETA history
pub fn append_eta_history(
    path: &Path,
    update_time: DateTime<Utc>,
    entity_id: &str,
    eta: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(StoreError::io(path))?;
    writeln!(
        file,
        "{},{},{}",
        local(update_time, offset),
        entity_id,
        local(eta, offset)
    )
    .map_err(StoreError::io(path))
}

/// Stall values already reported, one per line
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<u64>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path)(e)),
        };

        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse().map_err(|_| StoreError::InvalidContent {
                    path: self.path.clone(),
                    content: line.to_string(),
                })
            })
            .collect()
    }

    pub fn record(&self, value: u64) -> Result<(), StoreError> {
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(StoreError::io(&self.path))?;
        writeln!(file, "{}", value).map_err(StoreError::io(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Observation, Reading, SeriesAnalyzer};
    use crate::testing::scratch_dir;
    use chrono::TimeZone;

    fn pdt() -> FixedOffset {
        FixedOffset::west_opt(7 * 3600).unwrap()
    }

    fn reports() -> BTreeMap<String, Result<EntityReport, AnalysisError>> {
        let observations: Vec<Observation> = (0..10)
            .map(|i| Observation {
                timestamp: Utc.timestamp_opt(1_560_000_000 + i * 60, 0).unwrap(),
                entity_id: "rashomon".to_string(),
                value: Reading::Value(60_000 - 600 * i as u64),
                source: format!("{}.png", i),
            })
            .collect();
        SeriesAnalyzer::default().analyze(&observations)
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::seconds(3725)), "1h 02m 05s");
        assert_eq!(format_remaining(Duration::seconds(-5)), "0h 00m 00s");
    }

    #[test]
    fn test_summary_contents() {
        let reports = reports();
        let summary = format_summary(&reports, Utc.timestamp_opt(1_560_000_540, 0).unwrap(), pdt());

        // 600 per minute is 10 per second; 54600 left at the last point
        assert!(summary.contains("[rashomon]"));
        assert!(summary.contains("DPS: 10"));
        assert!(summary.contains("Remaining: 1h 31m 00s"));
        assert!(summary.contains("HP: 54600"));
        assert!(summary.contains("0 60000   10"));
    }

    #[test]
    fn test_summary_soft_failures() {
        let mut reports = reports();
        reports.insert("sparse".to_string(), Err(AnalysisError::EmptySeries));

        let summary = format_summary(&reports, Utc.timestamp_opt(0, 0).unwrap(), pdt());
        assert!(summary.contains("[sparse]\nNo estimate"));
    }

    #[test]
    fn test_eta_history_and_summary_files() {
        let dir = scratch_dir("report");
        let history = dir.join("out").join("eta_history.csv");
        let update = Utc.timestamp_opt(1_560_000_000, 0).unwrap();

        for hours in [2, 3] {
            let eta = update + Duration::hours(hours);
            append_eta_history(&history, update, "rashomon", eta, pdt()).unwrap();
        }
        let text = fs::read_to_string(&history).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(
            text.lines().next().unwrap(),
            "2019-06-08 06:20:00,rashomon,2019-06-08 08:20:00"
        );

        let summary = dir.join("eta.txt");
        write_summary(&summary, "first").unwrap();
        write_summary(&summary, "second").unwrap();
        assert_eq!(fs::read_to_string(&summary).unwrap(), "second");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_alert_log() {
        let dir = scratch_dir("alerts");
        let alerts = AlertLog::new(dir.join("mentioned.txt"));

        assert!(alerts.load().unwrap().is_empty());
        alerts.record(500).unwrap();
        alerts.record(320).unwrap();
        assert_eq!(alerts.load().unwrap(), vec![500, 320]);

        let _ = fs::remove_dir_all(&dir);
    }
}
