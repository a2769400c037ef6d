//! Configuration module
//!
//! Layouts, thresholds, presets and storage paths.

pub mod settings;

pub use settings::{Settings, SettingsError};
