//! Persistence around the analysis core
//!
//! Screenshot discovery and the last-processed watermark, the append-only
//! observation log, the human-readable reports written after each run, and
//! the ingest/analyze pass that ties them together.

pub mod record_log;
pub mod report;
pub mod run;
pub mod watermark;

use std::path::{Path, PathBuf};

pub use record_log::{ObservationRecord, RecordLog};
pub use report::AlertLog;
pub use watermark::{capture_time_from_name, pending_screenshots, PendingScreenshot, Watermark};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed record at {path:?} line {line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid content in {path:?}: {content:?}")]
    InvalidContent { path: PathBuf, content: String },
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create the parent directory of `path` if it has one
pub(crate) fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(StoreError::io(parent))
        }
        _ => Ok(()),
    }
}
