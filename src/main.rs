//! Raidwatch CLI
//!
//! Reads new screenshots from the input directory, appends their
//! observations to the record log, then recomputes every entity's series
//! and writes the ETA summary, ETA history and stall alerts.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;

use raidwatch::config::{Settings, SettingsError};
use raidwatch::store::run::{self, RunReport};
use raidwatch::{Tracker, TrackerError};

/// Track raid HP from screenshots and project completion times
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Options {
    /// Settings file (JSON); takes precedence over --preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// Built-in event preset: rashomon, onigashima, apocrypha, summer-race
    #[arg(long)]
    preset: Option<String>,

    /// Layout variant to use for screenshots without fixed dimensions
    #[arg(long)]
    layout: Option<String>,

    /// Screenshot directory, overriding the settings
    #[arg(long)]
    input: Option<PathBuf>,

    /// Skip ingestion and only recompute the reports
    #[arg(long)]
    analyze_only: bool,
}

impl Options {
    fn settings(&self) -> Result<Settings, SettingsError> {
        let mut settings = match (&self.config, &self.preset) {
            (Some(path), _) => Settings::load(path)?,
            (None, Some(name)) => Settings::preset(name)
                .ok_or_else(|| SettingsError::UnknownPreset(name.clone()))?,
            (None, None) => Settings::default(),
        };

        if let Some(ref layout) = self.layout {
            settings.layout_selector = Some(layout.clone());
        }
        if let Some(ref input) = self.input {
            settings.storage.input_dir = input.clone();
        }
        Ok(settings)
    }
}

fn execute(options: &Options) -> Result<RunReport, TrackerError> {
    let tracker = Tracker::new(options.settings()?)?;
    run::run(&tracker, options.analyze_only)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse();
    log::debug!("Started at {} with {:?}", Utc::now(), options);

    let report = match execute(&options) {
        Ok(report) => report,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref analysis) = report.analysis {
        print!("{}", analysis.summary);
        if let Some(value) = analysis.stall {
            println!("All entities stopped at {}.", value);
        }
    }

    if let Some(ref ingest) = report.ingest {
        for (source, error) in &ingest.failed {
            eprintln!("Failed {}: {}", source, error);
        }
    }

    if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
