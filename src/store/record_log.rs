//! Append-only observation log
//!
//! One JSON object per line: `{"timestamp", "entity_id", "value", "source"}`,
//! with `value` null for unreadable frames. Re-ingesting a screenshot never
//! duplicates its records.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ensure_parent, StoreError};
use crate::series::{Observation, Reading};

/// Serialized form of an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub value: Option<u64>,
    pub source: String,
}

impl From<&Observation> for ObservationRecord {
    fn from(observation: &Observation) -> Self {
        Self {
            timestamp: observation.timestamp,
            entity_id: observation.entity_id.clone(),
            value: observation.value.value(),
            source: observation.source.clone(),
        }
    }
}

impl From<ObservationRecord> for Observation {
    fn from(record: ObservationRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            entity_id: record.entity_id,
            value: Reading::from(record.value),
            source: record.source,
        }
    }
}

/// JSON-lines observation log
#[derive(Debug, Clone)]
pub struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record; a missing log is empty
    pub fn load(&self) -> Result<Vec<Observation>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path)(e)),
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<ObservationRecord>(line)
                    .map(Observation::from)
                    .map_err(|source| StoreError::Json {
                        path: self.path.clone(),
                        line: i + 1,
                        source,
                    })
            })
            .collect()
    }

    /// Append observations whose `(entity_id, source)` is not logged yet.
    ///
    /// Returns how many records were written.
    pub fn append(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        let mut known: HashSet<(String, String)> = self
            .load()?
            .into_iter()
            .map(|o| (o.entity_id, o.source))
            .collect();

        let fresh: Vec<&Observation> = observations
            .iter()
            .filter(|o| known.insert((o.entity_id.clone(), o.source.clone())))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        ensure_parent(&self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(StoreError::io(&self.path))?;
        let mut writer = BufWriter::new(file);

        for observation in &fresh {
            let record = ObservationRecord::from(*observation);
            let line = serde_json::to_string(&record).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                line: 0,
                source,
            })?;
            writeln!(writer, "{}", line).map_err(StoreError::io(&self.path))?;
        }
        writer.flush().map_err(StoreError::io(&self.path))?;

        log::info!("Appended {} records to {}", fresh.len(), self.path.display());
        Ok(fresh.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;
    use chrono::TimeZone;

    fn obs(secs: i64, entity: &str, value: Option<u64>) -> Observation {
        Observation {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            entity_id: entity.to_string(),
            value: value.into(),
            source: format!("{}.png", secs),
        }
    }

    #[test]
    fn test_missing_log_is_empty() {
        let log = RecordLog::new(scratch_dir("missing").join("nothing.jsonl"));
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_and_load() {
        let dir = scratch_dir("append");
        let log = RecordLog::new(dir.join("out").join("hp.jsonl"));

        let written = log.append(&[obs(10, "boss", Some(900)), obs(20, "boss", None)]).unwrap();
        assert_eq!(written, 2);

        let loaded = log.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value, Reading::Value(900));
        assert_eq!(loaded[1].value, Reading::Unreadable);

        let text = fs::read_to_string(log.path()).unwrap();
        assert!(text.lines().nth(1).unwrap().contains("\"value\":null"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reingestion_is_idempotent() {
        let dir = scratch_dir("idempotent");
        let log = RecordLog::new(dir.join("hp.jsonl"));

        log.append(&[obs(10, "boss", Some(900))]).unwrap();
        // Same screenshot read again, with a different value
        let written = log
            .append(&[obs(10, "boss", Some(901)), obs(30, "boss", Some(800))])
            .unwrap();
        assert_eq!(written, 1);

        let loaded = log.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value, Reading::Value(900));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_malformed_line() {
        let dir = scratch_dir("malformed");
        let path = dir.join("hp.jsonl");
        let good = r#"{"timestamp":"2019-06-06T07:00:00Z","entity_id":"a","value":1,"source":"x"}"#;
        fs::write(&path, format!("{}\nnot json\n", good)).unwrap();

        let err = RecordLog::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Json { line: 2, .. }));

        let _ = fs::remove_dir_all(&dir);
    }
}
