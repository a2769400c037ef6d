//! Raidwatch - raid HP tracking from screenshots
//!
//! This library reads boss HP values out of raid screenshots and turns the
//! resulting noisy readings into clean per-boss series, phases and
//! completion-time estimates.
//!
//! ## Pipeline
//!
//! - `vision`: layout lookup, template matching and digit reading, one
//!   screenshot at a time
//! - `series`: dedup, outlier rejection, phase detection, monotonic
//!   cleanup and rate/ETA estimation over the whole history
//! - `store`: screenshot discovery, the observation log, reports and the
//!   ingest/analyze run
//!
//! Screenshots are independent and are decoded in parallel with rayon;
//! everything in `series` runs afterwards over the merged batch.

pub mod config;
pub mod series;
pub mod store;
pub mod vision;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::{Settings, SettingsError};
use crate::series::{AnalysisError, EntityReport, Observation, SeriesAnalyzer};
use crate::store::StoreError;
use crate::vision::{AssetLibrary, ObservationPipeline, VisionError};

/// An encoded screenshot with its capture time
#[derive(Debug, Clone)]
pub struct Frame {
    /// Reference recorded with every observation (usually the file name)
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Observations of a decoded batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Merged observations, sorted by (timestamp, entity, source)
    pub observations: Vec<Observation>,
    /// Sources whose image bytes could not be decoded
    pub skipped: Vec<String>,
    /// Sources that hit a layout or template setup problem
    pub failed: Vec<(String, VisionError)>,
}

impl BatchOutcome {
    /// Whether any frame hit a setup problem
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Observation pipeline plus series analysis
pub struct Tracker {
    pub pipeline: ObservationPipeline,
    pub analyzer: SeriesAnalyzer,
    pub settings: Settings,
}

impl Tracker {
    /// Create a tracker, loading the template assets named in the settings
    pub fn new(settings: Settings) -> Result<Self, TrackerError> {
        let assets = AssetLibrary::load(&settings.assets)?;
        Self::with_assets(settings, assets)
    }

    /// Create a tracker with already-loaded assets
    pub fn with_assets(settings: Settings, assets: AssetLibrary) -> Result<Self, TrackerError> {
        Ok(Self {
            pipeline: ObservationPipeline::from_settings(&settings, assets)?,
            analyzer: SeriesAnalyzer::from_settings(&settings),
            settings,
        })
    }

    /// Observe one frame
    pub fn observe(&self, frame: &Frame) -> Result<Vec<Observation>, VisionError> {
        let selector = self.settings.layout_selector.as_deref();
        self.pipeline
            .process_bytes(&frame.bytes, frame.timestamp, &frame.source, selector)
    }

    /// Observe every frame of a batch in parallel.
    ///
    /// Every frame is handled on its own: a frame whose bytes cannot be
    /// decoded is skipped with a warning, and a frame that hits a setup
    /// problem (unknown geometry, missing template) is reported in
    /// `failed`. The other frames' observations are kept either way.
    pub fn decode_batch(&self, frames: &[Frame]) -> BatchOutcome {
        let results: Vec<(&Frame, Result<Vec<Observation>, VisionError>)> = frames
            .par_iter()
            .map(|frame| (frame, self.observe(frame)))
            .collect();

        let mut outcome = BatchOutcome::default();
        let mut observations = Vec::new();
        for (frame, result) in results {
            match result {
                Ok(found) => {
                    log::debug!("{}: {} observations", frame.source, found.len());
                    observations.extend(found);
                }
                Err(e) if e.is_configuration_defect() => {
                    log::error!("{}: {}", frame.source, e);
                    outcome.failed.push((frame.source.clone(), e));
                }
                Err(e) => {
                    log::warn!("Skipping {}: {}", frame.source, e);
                    outcome.skipped.push(frame.source.clone());
                }
            }
        }

        outcome.observations = series::merge_observations(observations);
        log::info!(
            "Decoded {} frames: {} observations, {} skipped, {} failed",
            frames.len(),
            outcome.observations.len(),
            outcome.skipped.len(),
            outcome.failed.len()
        );
        outcome
    }

    /// Analyze the full observation history per entity
    pub fn analyze(
        &self,
        observations: &[Observation],
    ) -> BTreeMap<String, Result<EntityReport, AnalysisError>> {
        self.analyzer.analyze(observations)
    }
}

/// Top-level errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::path::PathBuf;

    /// Fresh scratch directory under the system temp dir
    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "raidwatch-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
