//! Screenshot layouts and region extraction
//!
//! Maps known screenshot geometries to the fixed pixel rectangles that hold
//! the HP digits and the boss badge, and slices those regions out of a frame.
//! Layouts whose badges move around the frame carry a badge search instead.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::VisionError;

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from half-open column and row spans
    pub const fn from_spans(x_start: u32, x_end: u32, y_start: u32, y_end: u32) -> Self {
        Self::new(x_start, y_start, x_end - x_start, y_end - y_start)
    }

    /// Translate by the origin of an enclosing rectangle
    pub fn offset_by(&self, origin: &Rect) -> Rect {
        Rect::new(origin.x + self.x, origin.y + self.y, self.width, self.height)
    }

    /// Whether the rectangle lies entirely inside a `width` x `height` image
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
            && self.width > 0
            && self.height > 0
    }

    /// Crop this rectangle out of an image
    pub fn crop(&self, image: &RgbaImage) -> Result<RgbaImage, VisionError> {
        let (width, height) = image.dimensions();
        if !self.fits_within(width, height) {
            return Err(VisionError::RegionOutOfBounds {
                region: *self,
                width,
                height,
            });
        }
        Ok(image::imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image())
    }
}

/// One observable slot of a layout
///
/// `value` and `identity` are relative to `bounds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotLayout {
    /// Fixed entity id; when absent the pipeline identifies the entity
    /// from the identity region or falls back to `<layout>#<slot>`
    #[serde(default)]
    pub entity: Option<String>,
    /// Slot area in frame coordinates
    pub bounds: Rect,
    /// HP digit area
    pub value: Rect,
    /// Boss badge area used for identification
    #[serde(default)]
    pub identity: Option<Rect>,
    /// Label of the indicator template that marks the slot as active
    #[serde(default)]
    pub presence: Option<String>,
}

/// Search for identity badges anywhere in the frame.
///
/// Every identity template is looked for; each one found becomes an
/// observation for its label, read from the strip just below the badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeSearch {
    /// Score a badge must exceed to count as found
    pub min_score: f32,
    /// Columns of the value strip left of the badge
    pub extend_left: u32,
    /// Rows of the value strip below the badge
    pub rows_below: u32,
}

impl BadgeSearch {
    /// Value strip under a badge found at `badge`, clipped to the frame.
    /// `None` when nothing of the strip is left inside the frame.
    pub fn value_region(&self, badge: &Rect, width: u32, height: u32) -> Option<Rect> {
        let left = badge.x.saturating_sub(self.extend_left);
        let right = badge.x.saturating_add(badge.width).min(width);
        let top = badge.y.saturating_add(badge.height);
        let bottom = top.saturating_add(self.rows_below).min(height);

        (right > left && bottom > top).then(|| Rect::from_spans(left, right, top, bottom))
    }
}

/// A known screenshot geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutVariant {
    /// Variant tag, also usable as an explicit selector
    pub name: String,
    /// Exact frame size this variant applies to. Variants without
    /// dimensions can only be chosen by name.
    #[serde(default)]
    pub dimensions: Option<(u32, u32)>,
    /// Observable slots, in reading order
    #[serde(default)]
    pub slots: Vec<SlotLayout>,
    /// Badges located by search rather than at fixed slots
    #[serde(default)]
    pub badge_search: Option<BadgeSearch>,
}

impl LayoutVariant {
    /// Layout with a single fixed entity whose digits sit at `value`
    pub fn single(name: &str, entity: &str, width: u32, height: u32, value: Rect) -> Self {
        Self {
            name: name.to_string(),
            dimensions: Some((width, height)),
            slots: vec![SlotLayout {
                entity: Some(entity.to_string()),
                bounds: Rect::new(0, 0, width, height),
                value,
                identity: None,
                presence: None,
            }],
            badge_search: None,
        }
    }

    /// Same geometry with every slot pinned to `entity`
    pub fn with_entity(mut self, entity: &str) -> Self {
        for slot in &mut self.slots {
            slot.entity = Some(entity.to_string());
        }
        self
    }

    /// Whether this variant applies to a frame of the given size
    pub fn matches_dimensions(&self, width: u32, height: u32) -> bool {
        self.dimensions == Some((width, height))
    }

    /// Whether a frame can yield more than one observation
    pub fn is_multi_slot(&self) -> bool {
        self.slots.len() > 1 || self.badge_search.is_some()
    }
}

/// Registered layouts, resolved per frame
#[derive(Debug, Clone, Default)]
pub struct LayoutTable {
    variants: Vec<LayoutVariant>,
}

impl LayoutTable {
    /// Create a table from a list of variants
    pub fn new(variants: Vec<LayoutVariant>) -> Self {
        Self { variants }
    }

    /// All registered variants
    pub fn variants(&self) -> &[LayoutVariant] {
        &self.variants
    }

    /// Pick the variant for a frame, by explicit selector if given,
    /// otherwise by exact frame dimensions
    pub fn resolve(
        &self,
        width: u32,
        height: u32,
        selector: Option<&str>,
    ) -> Result<&LayoutVariant, VisionError> {
        let found = match selector {
            Some(name) => self.variants.iter().find(|v| v.name == name),
            None => self
                .variants
                .iter()
                .find(|v| v.matches_dimensions(width, height)),
        };

        found.ok_or_else(|| VisionError::UnknownLayout {
            width,
            height,
            selector: selector.map(str::to_string),
        })
    }
}

/// Pixel regions cut out of one slot
#[derive(Debug, Clone)]
pub struct SlotRegions {
    /// Slot index within the layout
    pub index: usize,
    /// Whole slot area (presence indicators are searched here)
    pub slot: RgbaImage,
    /// HP digit area
    pub value: RgbaImage,
    /// Boss badge area
    pub identity: Option<RgbaImage>,
}

/// Extract the regions of a single slot
pub fn extract_slot(
    image: &RgbaImage,
    variant: &LayoutVariant,
    index: usize,
) -> Result<SlotRegions, VisionError> {
    let slot = variant
        .slots
        .get(index)
        .ok_or_else(|| VisionError::UnknownSlot {
            layout: variant.name.clone(),
            index,
        })?;

    let identity = match slot.identity {
        Some(rect) => Some(rect.offset_by(&slot.bounds).crop(image)?),
        None => None,
    };

    Ok(SlotRegions {
        index,
        slot: slot.bounds.crop(image)?,
        value: slot.value.offset_by(&slot.bounds).crop(image)?,
        identity,
    })
}

/// Extract the regions of every slot of a variant
pub fn extract(
    image: &RgbaImage,
    variant: &LayoutVariant,
) -> Result<Vec<SlotRegions>, VisionError> {
    (0..variant.slots.len())
        .map(|index| extract_slot(image, variant, index))
        .collect()
}

/// Layout geometries of the screenshot sources seen so far
pub mod presets {
    use super::{BadgeSearch, LayoutVariant, Rect, SlotLayout};

    /// Cropped bot capture of the Rashomon HP banner
    pub fn rashomon_banner() -> LayoutVariant {
        LayoutVariant::single(
            "rashomon-banner",
            "rashomon",
            770,
            157,
            Rect::from_spans(342, 674, 37, 72),
        )
    }

    /// Full tablet screenshot of the Rashomon raid screen
    pub fn rashomon_tablet() -> LayoutVariant {
        LayoutVariant::single(
            "rashomon-tablet",
            "rashomon",
            2160,
            1440,
            Rect::from_spans(1400, 1732, 132, 169),
        )
    }

    /// Height of one Apocrypha battle slot, including the separator
    pub const APOCRYPHA_SLOT_PITCH: u32 = 139;

    /// Label of the Apocrypha slot indicator, after its `open sign.png` asset
    pub const APOCRYPHA_OPEN_SIGN: &str = "open sign";

    /// Three stacked Apocrypha battle slots with open-sign and boss badge
    pub fn apocrypha_battles() -> LayoutVariant {
        let slots = (0..3)
            .map(|i| SlotLayout {
                entity: None,
                bounds: Rect::from_spans(
                    2,
                    378,
                    31 + i * APOCRYPHA_SLOT_PITCH,
                    169 + i * APOCRYPHA_SLOT_PITCH,
                ),
                value: Rect::new(0, 0, 376, 138),
                identity: Some(Rect::new(0, 0, 104, 138)),
                presence: Some(APOCRYPHA_OPEN_SIGN.to_string()),
            })
            .collect();

        LayoutVariant {
            name: "apocrypha".to_string(),
            dimensions: None,
            slots,
            badge_search: None,
        }
    }

    /// Race standings: team badges anywhere on screen, distance below each
    pub fn summer_race() -> LayoutVariant {
        LayoutVariant {
            name: "summer-race".to_string(),
            dimensions: None,
            slots: Vec::new(),
            badge_search: Some(BadgeSearch {
                min_score: 0.8,
                extend_left: 100,
                rows_below: 50,
            }),
        }
    }
}
