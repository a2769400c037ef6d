//! Screenshot discovery and the last-processed watermark
//!
//! Screenshots are named after their capture time in unix seconds
//! (`1561000000.png`). The watermark stores the capture time of the newest
//! processed screenshot so later runs only pick up new files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use super::{ensure_parent, StoreError};

/// Capture time encoded in a screenshot file name
pub fn capture_time_from_name(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.split('.').next()?;
    let seconds: i64 = stem.parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// A screenshot waiting to be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScreenshot {
    pub path: PathBuf,
    /// File name, used as the observation source
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// `.png` screenshots in `dir` captured strictly after `watermark`, oldest first
pub fn pending_screenshots(
    dir: &Path,
    watermark: i64,
) -> Result<Vec<PendingScreenshot>, StoreError> {
    let entries = fs::read_dir(dir).map_err(StoreError::io(dir))?;

    let mut pending = Vec::new();
    for entry in entries {
        let path = entry.map_err(StoreError::io(dir))?.path();
        let Some(name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            continue;
        };
        if !name.ends_with(".png") {
            continue;
        }

        let Some(timestamp) = capture_time_from_name(&name) else {
            log::warn!("Skipping {}: name is not a capture time", name);
            continue;
        };
        if timestamp.timestamp() > watermark {
            pending.push(PendingScreenshot { path, name, timestamp });
        }
    }

    pending.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
    Ok(pending)
}

/// Persistent last-processed capture time
#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stored capture time in unix seconds; 0 when nothing was processed yet
    pub fn load(&self) -> Result<i64, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => text.trim().parse().map_err(|_| StoreError::InvalidContent {
                path: self.path.clone(),
                content: text.trim().to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StoreError::io(&self.path)(e)),
        }
    }

    pub fn store(&self, seconds: i64) -> Result<(), StoreError> {
        ensure_parent(&self.path)?;
        fs::write(&self.path, seconds.to_string()).map_err(StoreError::io(&self.path))
    }

    /// Move the watermark forward to `seconds`; never moves it back
    pub fn advance(&self, seconds: i64) -> Result<i64, StoreError> {
        let current = self.load()?;
        if seconds > current {
            self.store(seconds)?;
            log::debug!("Watermark advanced to {}", seconds);
            Ok(seconds)
        } else {
            Ok(current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;

    #[test]
    fn test_capture_time_from_name() {
        assert_eq!(
            capture_time_from_name("1561000000.png"),
            Some(Utc.timestamp_opt(1_561_000_000, 0).unwrap())
        );
        assert_eq!(
            capture_time_from_name("1561000000"),
            Some(Utc.timestamp_opt(1_561_000_000, 0).unwrap())
        );
        assert_eq!(capture_time_from_name("screenshot.png"), None);
        assert_eq!(capture_time_from_name(""), None);
    }

    #[test]
    fn test_pending_screenshots() {
        let dir = scratch_dir("pending");
        for name in ["300.png", "100.png", "200.png", "notes.png", "400.jpg"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let pending = pending_screenshots(&dir, 100).unwrap();
        let names: Vec<&str> = pending.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["200.png", "300.png"]);
        assert_eq!(pending[0].timestamp, Utc.timestamp_opt(200, 0).unwrap());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_watermark_roundtrip() {
        let dir = scratch_dir("watermark");
        let watermark = Watermark::new(dir.join("out").join("last_parsed"));

        assert_eq!(watermark.load().unwrap(), 0);
        assert_eq!(watermark.advance(500).unwrap(), 500);
        assert_eq!(watermark.advance(400).unwrap(), 500);
        assert_eq!(watermark.load().unwrap(), 500);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_watermark() {
        let dir = scratch_dir("bad-watermark");
        let path = dir.join("last_parsed");
        fs::write(&path, "yesterday").unwrap();

        assert!(matches!(Watermark::new(&path).load(), Err(StoreError::InvalidContent { .. })));

        let _ = fs::remove_dir_all(&dir);
    }
}
