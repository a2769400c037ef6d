//! Tracker settings and deployment presets
//!
//! Defines every tunable of the pipeline: screenshot layouts, asset
//! locations, digit and template thresholds, series cleaning, phase
//! detection, ETA windows and output paths.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::series::{filter, rate};
use crate::vision::layout::{presets, LayoutVariant};
use crate::vision::{matching, ocr};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Known screenshot geometries
    pub layouts: Vec<LayoutVariant>,
    /// Explicit layout selector for variants without fixed dimensions
    pub layout_selector: Option<String>,
    /// Template asset directories
    pub assets: AssetSettings,
    /// Digit reader tuning
    pub digits: DigitSettings,
    /// Template matcher thresholds
    pub matching: MatchSettings,
    /// Series cleaning
    pub filter: FilterSettings,
    /// Phase detection
    pub phases: PhaseSettings,
    /// Rate and ETA estimation
    pub eta: EtaSettings,
    /// Input and output locations
    pub storage: StorageSettings,
    /// Offset from UTC, in hours, used when printing times
    pub display_offset_hours: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            layouts: vec![presets::rashomon_banner(), presets::rashomon_tablet()],
            layout_selector: None,
            assets: AssetSettings::default(),
            digits: DigitSettings::default(),
            matching: MatchSettings::default(),
            filter: FilterSettings::default(),
            phases: PhaseSettings::default(),
            eta: EtaSettings::default(),
            storage: StorageSettings::default(),
            display_offset_hours: -7,
        }
    }
}

impl Settings {
    /// Single Rashomon HP banner, read from bot captures or tablet screenshots.
    /// Readings must exceed 1000.
    pub fn rashomon_preset() -> Self {
        Self {
            filter: FilterSettings {
                min_value: 1001,
                excluded_values: vec![3],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Onigashima gates: one HP bar that refills for every new gate boss
    pub fn onigashima_preset() -> Self {
        let layouts = [presets::rashomon_banner(), presets::rashomon_tablet()]
            .into_iter()
            .map(|layout| layout.with_entity(ONIGASHIMA))
            .collect();

        let starts: Vec<DateTime<Utc>> = ONIGASHIMA_GATE_STARTS
            .iter()
            .filter_map(|&(month, day, h, m, s)| pacific(2019, month, day, h, m, s))
            .collect();

        Self {
            layouts,
            filter: FilterSettings {
                excluded_values: vec![3],
                ..Default::default()
            },
            phases: PhaseSettings {
                reset_threshold: 5_000_000_000_000,
                reference_starts: BTreeMap::from([(ONIGASHIMA.to_string(), starts)]),
            },
            eta: EtaSettings {
                window: 1000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Apocrypha battle list: three slots per frame, boss identified by badge.
    /// The indicator directory must hold the `open sign.png` template.
    pub fn apocrypha_preset() -> Self {
        Self {
            layouts: vec![presets::apocrypha_battles()],
            layout_selector: Some("apocrypha".to_string()),
            assets: AssetSettings {
                identity_dir: Some(PathBuf::from("assets/bosses")),
                indicator_dir: Some(PathBuf::from("assets/indicators")),
                glyph_dir: None,
            },
            digits: DigitSettings {
                bright_floor: 155,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Summer race standings: each team badge is searched over the whole
    /// screen and its distance read below it. Badge files named `<team>_.png`
    /// count as `<team>`.
    ///
    /// Distances grow during the race, so only the raw and filtered series
    /// are meaningful; projections report a degenerate window.
    pub fn summer_race_preset() -> Self {
        Self {
            layouts: vec![presets::summer_race()],
            layout_selector: Some("summer-race".to_string()),
            assets: AssetSettings {
                identity_dir: Some(PathBuf::from("assets/teams")),
                ..Default::default()
            },
            digits: DigitSettings {
                bright_floor: 155,
                ..Default::default()
            },
            filter: FilterSettings {
                min_value: 1001,
                excluded_values: vec![3],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "rashomon" => Some(Self::rashomon_preset()),
            "onigashima" => Some(Self::onigashima_preset()),
            "apocrypha" => Some(Self::apocrypha_preset()),
            "summer-race" => Some(Self::summer_race_preset()),
            _ => None,
        }
    }

    /// Load settings from a JSON file; missing sections take their defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Offset applied when printing times
    pub fn display_offset(&self) -> FixedOffset {
        let seconds = self.display_offset_hours.saturating_mul(3600);
        FixedOffset::east_opt(seconds).unwrap_or(Utc.fix())
    }
}

const ONIGASHIMA: &str = "onigashima";

/// Gate start times in Pacific daylight time (month, day, h, m, s)
const ONIGASHIMA_GATE_STARTS: [(u32, u32, u32, u32, u32); 7] = [
    (6, 6, 0, 0, 0),
    (6, 6, 18, 14, 53),
    (6, 8, 0, 0, 27),
    (6, 9, 5, 52, 52),
    (6, 11, 17, 0, 0),
    (6, 14, 17, 0, 0),
    (6, 17, 17, 0, 0),
];

fn pacific(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Utc>> {
    FixedOffset::west_opt(7 * 3600)?
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

/// Template asset directories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Boss/team badge images
    pub identity_dir: Option<PathBuf>,
    /// Slot indicator images (such as `open sign.png`)
    pub indicator_dir: Option<PathBuf>,
    /// Digit glyph images `0.png`..`9.png`; built-in font when unset
    pub glyph_dir: Option<PathBuf>,
}

/// Text recognition engine behind the digit reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigitEngine {
    /// Glyph matching against the built-in font or a glyph directory
    #[default]
    Glyphs,
    /// libtesseract, available with the `tesseract` feature
    Tesseract,
}

/// Digit reader tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitSettings {
    /// Recognition engine
    pub engine: DigitEngine,
    /// Minimum value of every channel for a bright pixel
    pub bright_floor: u8,
    /// Bright fraction above which the neutral-tone pass runs
    pub noise_fraction: f32,
    /// Maximum channel spread of a neutral-tone pixel
    pub channel_tolerance: u8,
    /// Glyphs scoring below this are discarded
    pub min_glyph_score: f32,
    /// Tesseract trained data directory; Tesseract's default when unset
    pub tessdata_dir: Option<PathBuf>,
    /// Tesseract language
    pub language: String,
}

impl Default for DigitSettings {
    fn default() -> Self {
        Self {
            engine: DigitEngine::Glyphs,
            bright_floor: ocr::DEFAULT_BRIGHT_FLOOR,
            noise_fraction: ocr::DEFAULT_NOISE_FRACTION,
            channel_tolerance: ocr::DEFAULT_CHANNEL_TOLERANCE,
            min_glyph_score: ocr::DEFAULT_MIN_GLYPH_SCORE,
            tessdata_dir: None,
            language: "eng".to_string(),
        }
    }
}

/// Template matcher thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Score above which an indicator counts as present
    pub presence_threshold: f32,
    /// Identity matches below this are logged as low confidence
    pub low_confidence_threshold: f32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            presence_threshold: matching::DEFAULT_PRESENCE_THRESHOLD,
            low_confidence_threshold: matching::DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Series cleaning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Rolling window, in points
    pub window: usize,
    /// Band half-width, in MADs
    pub offset: f64,
    /// Readings below this are dropped
    pub min_value: u64,
    /// Readings equal to any of these are dropped
    pub excluded_values: Vec<u64>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            window: filter::DEFAULT_WINDOW,
            offset: filter::DEFAULT_OFFSET,
            min_value: 0,
            excluded_values: Vec::new(),
        }
    }
}

/// Phase detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    /// Upward jump that starts a new phase
    pub reset_threshold: u64,
    /// Known phase start times per entity, in phase order
    pub reference_starts: BTreeMap<String, Vec<DateTime<Utc>>>,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            reset_threshold: u64::MAX,
            reference_starts: BTreeMap::new(),
        }
    }
}

/// Rate and ETA estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtaSettings {
    /// Trailing intervals used for the average rate
    pub window: usize,
    /// Moving-average width of the rate trend
    pub smoothing_window: usize,
}

impl Default for EtaSettings {
    fn default() -> Self {
        Self {
            window: rate::DEFAULT_ETA_WINDOW,
            smoothing_window: rate::DEFAULT_SMOOTHING_WINDOW,
        }
    }
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory scanned for `<unix seconds>.png` screenshots
    pub input_dir: PathBuf,
    /// Append-only observation log
    pub record_log: PathBuf,
    /// Capture time of the last processed screenshot
    pub watermark: PathBuf,
    /// Latest ETA summary
    pub report: PathBuf,
    /// One line per run with the projected ETA
    pub eta_history: PathBuf,
    /// Stall values already reported
    pub alerted: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            record_log: PathBuf::from("output/parsed_hp.jsonl"),
            watermark: PathBuf::from("output/last_parsed"),
            report: PathBuf::from("output/eta.txt"),
            eta_history: PathBuf::from("output/eta_history.csv"),
            alerted: PathBuf::from("output/mentioned.txt"),
        }
    }
}

/// Settings loading errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown preset {0}")]
    UnknownPreset(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.layouts.len(), 2);
        assert_eq!(settings.digits.bright_floor, 163);
        assert_eq!(settings.filter.window, 7);
        assert_eq!(settings.filter.offset, 3.0);
        assert_eq!(settings.eta.window, 200);
        assert_eq!(settings.matching.presence_threshold, 0.70);
    }

    #[test]
    fn test_onigashima_preset() {
        let settings = Settings::onigashima_preset();
        assert_eq!(settings.phases.reset_threshold, 5_000_000_000_000);
        assert_eq!(settings.eta.window, 1000);
        assert!(settings
            .layouts
            .iter()
            .all(|l| l.slots[0].entity.as_deref() == Some("onigashima")));

        let starts = &settings.phases.reference_starts["onigashima"];
        assert_eq!(starts.len(), 7);
        // Midnight PDT is 07:00 UTC
        assert_eq!(starts[0], Utc.with_ymd_and_hms(2019, 6, 6, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_apocrypha_preset() {
        let settings = Settings::apocrypha_preset();
        assert_eq!(settings.digits.bright_floor, 155);
        assert_eq!(settings.layout_selector.as_deref(), Some("apocrypha"));
        assert_eq!(settings.layouts[0].slots.len(), 3);
    }

    #[test]
    fn test_summer_race_preset() {
        let settings = Settings::summer_race_preset();
        assert_eq!(settings.layout_selector.as_deref(), Some("summer-race"));
        assert!(settings.layouts[0].badge_search.is_some());
        assert_eq!(settings.filter.min_value, 1001);
        assert_eq!(settings.digits.bright_floor, 155);
    }

    #[test]
    fn test_preset_lookup() {
        assert!(Settings::preset("rashomon").is_some());
        assert!(Settings::preset("summer-race").is_some());
        assert!(Settings::preset("summer").is_none());

        let rashomon = Settings::preset("rashomon").unwrap();
        assert_eq!(rashomon.filter.excluded_values, vec![3]);
        // A reading of exactly 1000 is dropped
        assert_eq!(rashomon.filter.min_value, 1001);
    }

    #[test]
    fn test_digit_engine_from_json() {
        let json = r#"{"digits": {"engine": "tesseract", "tessdata_dir": "/opt/tessdata"}}"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.digits.engine, DigitEngine::Tesseract);
        assert_eq!(settings.digits.language, "eng");
        assert_eq!(settings.digits.bright_floor, 163);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"filter": {"window": 9}, "display_offset_hours": 9}"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.filter.window, 9);
        assert_eq!(settings.filter.offset, 3.0);
        assert_eq!(settings.layouts.len(), 2);
        assert_eq!(settings.display_offset().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn test_json_roundtrip_preserves_layouts() {
        let settings = Settings::apocrypha_preset();
        let json = settings.to_json().unwrap();
        let parsed = Settings::from_json(&json).unwrap();
        assert_eq!(parsed.layouts, settings.layouts);
    }

    #[test]
    fn test_load_missing_file() {
        let missing = std::env::temp_dir().join("raidwatch-settings-does-not-exist.json");
        assert!(matches!(Settings::load(&missing), Err(SettingsError::Io { .. })));
    }
}
