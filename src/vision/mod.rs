//! Vision and image processing module
//!
//! Turns raid screenshots into HP observations: layout lookup, region
//! extraction, template matching for slot state and boss identity, and
//! digit reading.

pub mod assets;
pub mod layout;
pub mod matching;
pub mod ocr;
#[cfg(feature = "tesseract")]
pub mod tesseract;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use image::RgbaImage;

use crate::config::Settings;
use crate::series::{Observation, Reading};

pub use assets::AssetLibrary;
pub use layout::{BadgeSearch, LayoutTable, LayoutVariant, Rect, SlotLayout};
pub use matching::{Located, MatchResult, Template, TemplateLibrary, VisualMatcher};
pub use ocr::{DigitReader, GlyphRecognizer, TextRecognizer};

/// Turns one screenshot into zero or more observations
pub struct ObservationPipeline {
    /// Known screenshot geometries
    layouts: LayoutTable,
    /// Badge, indicator and glyph templates
    assets: AssetLibrary,
    /// Template matcher
    matcher: VisualMatcher,
    /// Digit reader
    reader: DigitReader,
}

impl ObservationPipeline {
    /// Create a pipeline from its parts
    pub fn new(
        layouts: LayoutTable,
        assets: AssetLibrary,
        matcher: VisualMatcher,
        reader: DigitReader,
    ) -> Self {
        Self {
            layouts,
            assets,
            matcher,
            reader,
        }
    }

    /// Create a pipeline configured by the settings and loaded assets
    pub fn from_settings(settings: &Settings, assets: AssetLibrary) -> Result<Self, VisionError> {
        let recognizer = ocr::engine_from_settings(&settings.digits, assets.glyphs.as_ref())?;

        let reader = DigitReader::with_recognizer(recognizer)
            .with_bright_floor(settings.digits.bright_floor)
            .with_neutral_pass(settings.digits.noise_fraction, settings.digits.channel_tolerance);

        let matcher = VisualMatcher::new()
            .with_presence_threshold(settings.matching.presence_threshold)
            .with_low_confidence_threshold(settings.matching.low_confidence_threshold);

        let layouts = LayoutTable::new(settings.layouts.clone());
        Ok(Self::new(layouts, assets, matcher, reader))
    }

    /// Lazily observe every slot and searched badge of a screenshot.
    ///
    /// The layout is resolved up front, so an unknown geometry fails before
    /// any slot is read. Inactive slots and badges not found yield nothing.
    pub fn observations<'a>(
        &'a self,
        image: &'a RgbaImage,
        timestamp: DateTime<Utc>,
        source: &'a str,
        selector: Option<&str>,
    ) -> Result<impl Iterator<Item = Result<Observation, VisionError>> + 'a, VisionError> {
        let (width, height) = image.dimensions();
        let variant = self.layouts.resolve(width, height, selector)?;
        if variant.badge_search.is_some() && self.assets.identities.is_empty() {
            return Err(VisionError::NoTemplates);
        }

        let fixed = (0..variant.slots.len()).filter_map(move |index| {
            self.observe_slot(image, variant, index, timestamp, source)
                .transpose()
        });

        let searched = variant.badge_search.iter().flat_map(move |search| {
            self.assets.identities.iter().filter_map(move |badge| {
                self.observe_badge(image, search, badge, timestamp, source)
                    .transpose()
            })
        });

        Ok(fixed.chain(searched))
    }

    /// Observe every slot of a screenshot
    pub fn process(
        &self,
        image: &RgbaImage,
        timestamp: DateTime<Utc>,
        source: &str,
        selector: Option<&str>,
    ) -> Result<Vec<Observation>, VisionError> {
        self.observations(image, timestamp, source, selector)?
            .collect()
    }

    /// Decode and observe an encoded screenshot
    pub fn process_bytes(
        &self,
        bytes: &[u8],
        timestamp: DateTime<Utc>,
        source: &str,
        selector: Option<&str>,
    ) -> Result<Vec<Observation>, VisionError> {
        let image = assets::decode_image(bytes)?;
        self.process(&image, timestamp, source, selector)
    }

    fn observe_slot(
        &self,
        image: &RgbaImage,
        variant: &LayoutVariant,
        index: usize,
        timestamp: DateTime<Utc>,
        source: &str,
    ) -> Result<Option<Observation>, VisionError> {
        let slot = &variant.slots[index];
        let regions = layout::extract_slot(image, variant, index)?;

        if let Some(ref label) = slot.presence {
            let indicator = self
                .assets
                .indicators
                .get(label)
                .ok_or_else(|| VisionError::MissingIndicator(label.clone()))?;

            if !self.matcher.is_present(&regions.slot, indicator)? {
                log::debug!("{}: slot {} inactive", source, index);
                return Ok(None);
            }
        }

        let entity_id = match (&slot.entity, &regions.identity) {
            (Some(entity), _) => entity.clone(),
            (None, Some(identity)) => {
                self.matcher
                    .best_match(identity, &self.assets.identities)?
                    .label
            }
            (None, None) => format!("{}#{}", variant.name, index),
        };

        let value = self.reader.read_digits(&regions.value);
        log::debug!("{}: {} = {:?}", source, entity_id, value);

        Ok(Some(Observation {
            timestamp,
            entity_id,
            value,
            source: source.to_string(),
        }))
    }

    fn observe_badge(
        &self,
        image: &RgbaImage,
        search: &BadgeSearch,
        badge: &Template,
        timestamp: DateTime<Utc>,
        source: &str,
    ) -> Result<Option<Observation>, VisionError> {
        let Some(found) = self.matcher.locate(image, badge, search.min_score)? else {
            return Ok(None);
        };

        let (width, height) = image.dimensions();
        let value = match search.value_region(&found.bounds, width, height) {
            Some(rect) => self.reader.read_digits(&rect.crop(image)?),
            None => Reading::Unreadable,
        };
        log::debug!("{}: {} = {:?}", source, badge.label, value);

        Ok(Some(Observation {
            timestamp,
            entity_id: badge.label.clone(),
            value,
            source: source.to_string(),
        }))
    }
}

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("No layout for {width}x{height} frame (selector {selector:?})")]
    UnknownLayout {
        width: u32,
        height: u32,
        selector: Option<String>,
    },
    #[error("Layout {layout} has no slot {index}")]
    UnknownSlot { layout: String, index: usize },
    #[error("Region {region:?} outside {width}x{height} frame")]
    RegionOutOfBounds {
        region: Rect,
        width: u32,
        height: u32,
    },
    #[error("Template library is empty")]
    NoTemplates,
    #[error("No indicator template labelled {0}")]
    MissingIndicator(String),
    #[error("Template {label} ({template:?}) does not fit region {region:?}")]
    TemplateTooLarge {
        label: String,
        template: (u32, u32),
        region: (u32, u32),
    },
    #[error("Invalid digit glyph template: {0}")]
    InvalidGlyph(String),
    #[error("Digit engine {0} is not available in this build")]
    EngineUnavailable(String),
    #[error("Digit engine failed to start: {0}")]
    EngineInit(String),
    #[error("Failed to load asset {path:?}: {reason}")]
    AssetLoad { path: PathBuf, reason: String },
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),
}

impl VisionError {
    /// Whether the error points at the layout/template setup rather than
    /// at a single bad image
    pub fn is_configuration_defect(&self) -> bool {
        !matches!(self, VisionError::ImageDecode(_))
    }
}
