//! Template asset loading
//!
//! Loads boss badges, slot indicators and optional digit glyphs from the
//! asset directories named in the settings. Assets are loaded once at
//! startup and only read afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;

use super::matching::{Template, TemplateLibrary};
use super::VisionError;
use crate::config::settings::AssetSettings;

/// All template libraries used by the observation pipeline
#[derive(Debug, Clone, Default)]
pub struct AssetLibrary {
    /// Boss/team badges, matched against identity regions
    pub identities: TemplateLibrary,
    /// Slot state indicators, matched against whole slots
    pub indicators: TemplateLibrary,
    /// Digit glyphs labelled "0".."9"; the built-in font is used when absent
    pub glyphs: Option<TemplateLibrary>,
}

impl AssetLibrary {
    /// Create an empty asset library
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured asset directory
    pub fn load(settings: &AssetSettings) -> Result<Self, VisionError> {
        let mut assets = Self::new();

        if let Some(ref dir) = settings.identity_dir {
            assets.identities = load_template_dir(dir)?;
            log::info!(
                "Loaded {} identity templates from {}",
                assets.identities.len(),
                dir.display()
            );
        }

        if let Some(ref dir) = settings.indicator_dir {
            assets.indicators = load_template_dir(dir)?;
            log::info!(
                "Loaded {} indicator templates from {}",
                assets.indicators.len(),
                dir.display()
            );
        }

        if let Some(ref dir) = settings.glyph_dir {
            let glyphs = load_template_dir(dir)?;
            log::info!("Loaded {} digit glyphs from {}", glyphs.len(), dir.display());
            assets.glyphs = Some(glyphs);
        }

        Ok(assets)
    }
}

/// Load every `.png` in a directory as a template.
///
/// The label is the file stem with trailing underscores removed. Files are
/// read in name order and a later file replaces an earlier one with the
/// same label.
pub fn load_template_dir(dir: &Path) -> Result<TemplateLibrary, VisionError> {
    let entries = fs::read_dir(dir).map_err(|e| VisionError::AssetLoad {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();

    let mut library = TemplateLibrary::new();
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let label = stem.trim_end_matches('_');
        let image = load_image(&path)?;
        library.insert(Template::from_rgba(label, &image));
    }

    Ok(library)
}

/// Decode an image file into RGBA pixels
pub fn load_image(path: &Path) -> Result<RgbaImage, VisionError> {
    let image = image::open(path).map_err(|e| VisionError::AssetLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(image.to_rgba8())
}

/// Decode in-memory image bytes (PNG, JPEG, ...) into RGBA pixels
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, VisionError> {
    let image =
        image::load_from_memory(bytes).map_err(|e| VisionError::ImageDecode(e.to_string()))?;
    Ok(image.to_rgba8())
}
