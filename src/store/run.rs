//! One ingest and analyze pass
//!
//! Ingest decodes the screenshots captured after the watermark, appends
//! their observations to the record log and then moves the watermark past
//! them. Analyze recomputes every entity from the full record log and
//! writes the summary, ETA history and stall alert.

use std::fs;

use chrono::{DateTime, Utc};

use super::{pending_screenshots, report, AlertLog, RecordLog, Watermark};
use crate::series::common_stall;
use crate::vision::VisionError;
use crate::{Frame, Tracker, TrackerError};

/// What an ingest pass did
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Screenshots newer than the watermark
    pub pending: usize,
    /// Records newly written to the log
    pub appended: usize,
    /// Screenshots that could not be read or decoded
    pub skipped: Vec<String>,
    /// Screenshots that hit a layout or template setup problem
    pub failed: Vec<(String, VisionError)>,
    /// Watermark after the pass
    pub watermark: i64,
}

/// What an analyze pass produced
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    /// Capture time of the newest observation
    pub update_time: DateTime<Utc>,
    pub summary: String,
    /// Newly detected common stall value
    pub stall: Option<u64>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Absent when ingestion was skipped
    pub ingest: Option<IngestReport>,
    /// Absent when the record log is empty
    pub analysis: Option<AnalysisRun>,
}

impl RunReport {
    /// Whether any screenshot hit a setup problem
    pub fn has_failures(&self) -> bool {
        self.ingest
            .as_ref()
            .is_some_and(|ingest| !ingest.failed.is_empty())
    }
}

/// Decode screenshots newer than the watermark and log their observations.
///
/// The watermark only moves once the observations are on disk.
pub fn ingest(tracker: &Tracker) -> Result<IngestReport, TrackerError> {
    let storage = &tracker.settings.storage;
    let watermark = Watermark::new(&storage.watermark);
    let current = watermark.load()?;
    let pending = pending_screenshots(&storage.input_dir, current)?;
    if pending.is_empty() {
        log::info!("No new screenshots in {}", storage.input_dir.display());
        return Ok(IngestReport {
            watermark: current,
            ..IngestReport::default()
        });
    }

    let mut unreadable = Vec::new();
    let mut frames = Vec::with_capacity(pending.len());
    for shot in &pending {
        match fs::read(&shot.path) {
            Ok(bytes) => frames.push(Frame {
                source: shot.name.clone(),
                timestamp: shot.timestamp,
                bytes,
            }),
            Err(e) => {
                log::warn!("Skipping {}: {}", shot.path.display(), e);
                unreadable.push(shot.name.clone());
            }
        }
    }

    let outcome = tracker.decode_batch(&frames);
    let appended = RecordLog::new(&storage.record_log).append(&outcome.observations)?;

    let newest = pending
        .iter()
        .map(|shot| shot.timestamp.timestamp())
        .max()
        .unwrap_or(current);
    let advanced = watermark.advance(newest)?;
    log::info!(
        "Ingested {} screenshots, {} new records, watermark {}",
        pending.len(),
        appended,
        advanced
    );

    unreadable.extend(outcome.skipped);
    Ok(IngestReport {
        pending: pending.len(),
        appended,
        skipped: unreadable,
        failed: outcome.failed,
        watermark: advanced,
    })
}

/// Recompute every entity from the full record log and write the reports
pub fn analyze(tracker: &Tracker) -> Result<Option<AnalysisRun>, TrackerError> {
    let storage = &tracker.settings.storage;
    let offset = tracker.settings.display_offset();
    let observations = RecordLog::new(&storage.record_log).load()?;
    let Some(update_time) = observations.iter().map(|o| o.timestamp).max() else {
        log::info!("Record log is empty, nothing to analyze");
        return Ok(None);
    };

    let reports = tracker.analyze(&observations);

    let summary = report::format_summary(&reports, update_time, offset);
    report::write_summary(&storage.report, &summary)?;

    for (entity_id, entity) in &reports {
        if let Ok(Ok(projection)) = entity.as_ref().map(|r| &r.projection) {
            report::append_eta_history(
                &storage.eta_history,
                update_time,
                entity_id,
                projection.eta,
                offset,
            )?;
        }
    }

    let alerts = AlertLog::new(&storage.alerted);
    let stall = common_stall(&reports, &alerts.load()?);
    if let Some(value) = stall {
        log::warn!("All entities stopped at {}", value);
        alerts.record(value)?;
    }

    log::info!("Wrote summary to {}", storage.report.display());
    Ok(Some(AnalysisRun {
        update_time,
        summary,
        stall,
    }))
}

/// Ingest (unless `analyze_only`) and then analyze
pub fn run(tracker: &Tracker, analyze_only: bool) -> Result<RunReport, TrackerError> {
    let ingest = if analyze_only {
        log::info!("Skipping ingestion");
        None
    } else {
        Some(ingest(tracker)?)
    };

    Ok(RunReport {
        ingest,
        analysis: analyze(tracker)?,
    })
}
