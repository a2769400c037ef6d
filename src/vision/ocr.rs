//! Digit reading for HP counters
//!
//! Isolates the near-white digit pixels of a region, inverts them into a
//! dark-on-light binary image and hands that to a single-line, digits-only
//! text recognizer.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::map::map_colors;
use once_cell::sync::Lazy;

use super::matching::TemplateLibrary;
use super::VisionError;
use crate::config::settings::{DigitEngine, DigitSettings};
use crate::series::Reading;

/// Default lower bound of the bright band, per channel
pub const DEFAULT_BRIGHT_FLOOR: u8 = 163;

/// Bright-pixel fraction above which the neutral-tone pass kicks in
pub const DEFAULT_NOISE_FRACTION: f32 = 0.20;

/// Default max spread between channels of a neutral pixel
pub const DEFAULT_CHANNEL_TOLERANCE: u8 = 24;

/// Gray level below which a binary pixel counts as ink
const INK_LEVEL: u8 = 128;

/// Text recognition engine fed with binary dark-on-light line images
pub trait TextRecognizer: Send + Sync {
    /// Recognize one line of text. May contain non-digit characters.
    fn recognize_line(&self, binary: &GrayImage) -> String;
}

/// Reads integer values out of HP regions
pub struct DigitReader {
    /// Lower bound of the bright band (upper bound is 255)
    bright_floor: u8,
    /// Bright fraction that triggers the neutral-tone pass
    noise_fraction: f32,
    /// Max channel spread of a neutral pixel
    channel_tolerance: u8,
    /// Recognition engine
    recognizer: Box<dyn TextRecognizer>,
}

impl DigitReader {
    /// Create a reader backed by the built-in digit glyphs
    pub fn new() -> Self {
        Self::with_recognizer(Box::new(GlyphRecognizer::new()))
    }

    /// Create a reader backed by a custom recognition engine
    pub fn with_recognizer(recognizer: Box<dyn TextRecognizer>) -> Self {
        Self {
            bright_floor: DEFAULT_BRIGHT_FLOOR,
            noise_fraction: DEFAULT_NOISE_FRACTION,
            channel_tolerance: DEFAULT_CHANNEL_TOLERANCE,
            recognizer,
        }
    }

    /// Set the lower bound of the bright band
    pub fn with_bright_floor(mut self, floor: u8) -> Self {
        self.bright_floor = floor;
        self
    }

    /// Set the noise fraction and channel tolerance of the neutral-tone pass
    pub fn with_neutral_pass(mut self, noise_fraction: f32, channel_tolerance: u8) -> Self {
        self.noise_fraction = noise_fraction;
        self.channel_tolerance = channel_tolerance;
        self
    }

    /// Read the integer shown in a region.
    ///
    /// `Unreadable` is a normal outcome, not an error.
    pub fn read_digits(&self, region: &RgbaImage) -> Reading {
        let binary = self.binarize(region);
        let raw = self.recognizer.recognize_line(&binary);
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

        if digits.is_empty() {
            log::trace!("No digits in recognizer output {:?}", raw);
            return Reading::Unreadable;
        }

        match digits.parse::<u64>() {
            Ok(value) => Reading::Value(value),
            Err(e) => {
                log::debug!("Digit string {} does not fit: {}", digits, e);
                Reading::Unreadable
            }
        }
    }

    /// Produce the inverted binary image: digit pixels 0, everything else 255
    pub fn binarize(&self, region: &RgbaImage) -> GrayImage {
        let floor = self.bright_floor;
        let bright = map_colors(region, |p| Luma([if is_bright(p.0, floor) { 1u8 } else { 0 }]));

        let total = (region.width() as usize) * (region.height() as usize);
        let count = bright.pixels().filter(|p| p[0] == 1).count();
        let fraction = if total == 0 { 0.0 } else { count as f32 / total as f32 };

        // Neutral-tone pass only for noisy regions
        let neutral_only = fraction > self.noise_fraction;
        if neutral_only {
            log::trace!("Bright fraction {:.2}, applying neutral-tone pass", fraction);
        }

        let tolerance = self.channel_tolerance;
        map_colors(region, |p| {
            let keep = is_bright(p.0, floor) && (!neutral_only || is_neutral(p.0, tolerance));
            Luma([if keep { 0u8 } else { 255 }])
        })
    }
}

impl Default for DigitReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Every color channel within [floor, 255]
fn is_bright(rgba: [u8; 4], floor: u8) -> bool {
    rgba[0] >= floor && rgba[1] >= floor && rgba[2] >= floor
}

/// Channels mutually close, i.e. white or gray rather than tinted
fn is_neutral(rgba: [u8; 4], tolerance: u8) -> bool {
    let max = rgba[0].max(rgba[1]).max(rgba[2]);
    let min = rgba[0].min(rgba[1]).min(rgba[2]);
    max - min <= tolerance
}

/// Built-in 5x7 digit font, one string per row
pub mod font {
    pub const WIDTH: usize = 5;
    pub const HEIGHT: usize = 7;

    pub const DIGITS: [[&str; HEIGHT]; 10] = [
        [".###.", "#...#", "#..##", "#.#.#", "##..#", "#...#", ".###."],
        ["..#..", ".##..", "..#..", "..#..", "..#..", "..#..", ".###."],
        [".###.", "#...#", "....#", "...#.", "..#..", ".#...", "#####"],
        ["#####", "...#.", "..#..", "...#.", "....#", "#...#", ".###."],
        ["...#.", "..##.", ".#.#.", "#..#.", "#####", "...#.", "...#."],
        ["#####", "#....", "####.", "....#", "....#", "#...#", ".###."],
        ["..##.", ".#...", "#....", "####.", "#...#", "#...#", ".###."],
        ["#####", "....#", "...#.", "..#..", ".#...", ".#...", ".#..."],
        [".###.", "#...#", "#...#", ".###.", "#...#", "#...#", ".###."],
        [".###.", "#...#", "#...#", ".####", "....#", "...#.", ".##.."],
    ];

    /// Whether the font pixel at (x, y) of `digit` is set
    pub fn is_set(digit: usize, x: usize, y: usize) -> bool {
        DIGITS[digit][y].as_bytes()[x] == b'#'
    }
}

/// Sampling grid every glyph is normalized onto
const GRID_WIDTH: u32 = 10;
const GRID_HEIGHT: u32 = 14;

/// Default minimum fraction of agreeing grid cells for a glyph to be accepted
pub const DEFAULT_MIN_GLYPH_SCORE: f32 = 0.80;

static BUILTIN_GLYPHS: Lazy<Vec<(char, Vec<bool>)>> = Lazy::new(|| {
    (0..10)
        .filter_map(|d| {
            let (width, height) = (font::WIDTH as u32, font::HEIGHT as u32);
            let bitmap = GrayImage::from_fn(width, height, |x, y| {
                let set = font::is_set(d, x as usize, y as usize);
                Luma([if set { 0 } else { 255 }])
            });
            let label = char::from(b'0' + d as u8);
            glyph_grid(&bitmap).map(|grid| (label, grid))
        })
        .collect()
});

/// Digit recognizer comparing segmented glyphs against digit bitmaps
pub struct GlyphRecognizer {
    /// Normalized glyph grids, one per digit
    glyphs: Vec<(char, Vec<bool>)>,
    /// Minimum agreement for a glyph to be read as a digit
    min_score: f32,
}

impl GlyphRecognizer {
    /// Create a recognizer using the built-in font
    pub fn new() -> Self {
        Self {
            glyphs: BUILTIN_GLYPHS.clone(),
            min_score: DEFAULT_MIN_GLYPH_SCORE,
        }
    }

    /// Create a recognizer from digit images labelled "0" to "9"
    pub fn from_library(library: &TemplateLibrary) -> Result<Self, VisionError> {
        let mut glyphs = Vec::new();
        for template in library.iter() {
            let mut chars = template.label.chars();
            let (Some(label), None) = (chars.next(), chars.next()) else {
                return Err(VisionError::InvalidGlyph(template.label.clone()));
            };
            if !label.is_ascii_digit() {
                return Err(VisionError::InvalidGlyph(template.label.clone()));
            }

            let grid = glyph_grid(&template.image)
                .ok_or_else(|| VisionError::InvalidGlyph(template.label.clone()))?;
            glyphs.push((label, grid));
        }

        if glyphs.is_empty() {
            return Err(VisionError::NoTemplates);
        }

        Ok(Self {
            glyphs,
            min_score: DEFAULT_MIN_GLYPH_SCORE,
        })
    }

    /// Set the minimum glyph score
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Classify one normalized glyph grid
    fn classify(&self, grid: &[bool]) -> Option<(char, f32)> {
        self.glyphs
            .iter()
            .map(|(label, reference)| {
                let agree = reference.iter().zip(grid).filter(|(a, b)| a == b).count();
                (*label, agree as f32 / reference.len() as f32)
            })
            .fold(None, |best: Option<(char, f32)>, cand| match best {
                Some(b) if b.1 >= cand.1 => Some(b),
                _ => Some(cand),
            })
    }
}

impl Default for GlyphRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for GlyphRecognizer {
    fn recognize_line(&self, binary: &GrayImage) -> String {
        let spans = ink_spans(binary);
        let heights: Vec<u32> = spans
            .iter()
            .map(|&(x0, x1)| ink_rows(binary, x0, x1).map_or(0, |(top, bottom)| bottom - top + 1))
            .collect();
        let tallest = heights.iter().copied().max().unwrap_or(0);

        let mut text = String::new();
        for (&(x0, x1), &height) in spans.iter().zip(&heights) {
            // Thousands separators and specks
            if height * 2 < tallest {
                continue;
            }

            let grid = sample_glyph(binary, x0, x1);
            match self.classify(&grid) {
                Some((label, score)) if score >= self.min_score => text.push(label),
                _ => text.push('?'),
            }
        }

        text
    }
}

/// Build the recognition engine named in the digit settings
pub fn engine_from_settings(
    settings: &DigitSettings,
    glyphs: Option<&TemplateLibrary>,
) -> Result<Box<dyn TextRecognizer>, VisionError> {
    match settings.engine {
        DigitEngine::Glyphs => {
            let recognizer = match glyphs {
                Some(library) => GlyphRecognizer::from_library(library)?,
                None => GlyphRecognizer::new(),
            };
            Ok(Box::new(recognizer.with_min_score(settings.min_glyph_score)))
        }
        DigitEngine::Tesseract => tesseract_engine(settings),
    }
}

#[cfg(feature = "tesseract")]
fn tesseract_engine(settings: &DigitSettings) -> Result<Box<dyn TextRecognizer>, VisionError> {
    let engine = super::tesseract::TesseractRecognizer::new(
        settings.tessdata_dir.as_deref(),
        &settings.language,
    )?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "tesseract"))]
fn tesseract_engine(_settings: &DigitSettings) -> Result<Box<dyn TextRecognizer>, VisionError> {
    Err(VisionError::EngineUnavailable("tesseract".to_string()))
}

fn is_ink(image: &GrayImage, x: u32, y: u32) -> bool {
    image.get_pixel(x, y)[0] < INK_LEVEL
}

/// Inclusive column ranges containing ink, left to right
fn ink_spans(image: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = image.dimensions();
    let mut spans = Vec::new();
    let mut start = None;

    for x in 0..width {
        let has_ink = (0..height).any(|y| is_ink(image, x, y));
        match (has_ink, start) {
            (true, None) => start = Some(x),
            (false, Some(s)) => {
                spans.push((s, x - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, width - 1));
    }

    spans
}

/// Inclusive row range containing ink within columns x0..=x1
fn ink_rows(image: &GrayImage, x0: u32, x1: u32) -> Option<(u32, u32)> {
    let rows: Vec<u32> = (0..image.height())
        .filter(|&y| (x0..=x1).any(|x| is_ink(image, x, y)))
        .collect();
    Some((*rows.first()?, *rows.last()?))
}

/// Normalized grid covering the whole ink extent of a single-glyph image
fn glyph_grid(image: &GrayImage) -> Option<Vec<bool>> {
    let spans = ink_spans(image);
    let (first, last) = (spans.first()?, spans.last()?);
    Some(sample_glyph(image, first.0, last.1))
}

/// Sample the glyph bounding box in columns x0..=x1 onto the fixed grid
fn sample_glyph(image: &GrayImage, x0: u32, x1: u32) -> Vec<bool> {
    let Some((top, bottom)) = ink_rows(image, x0, x1) else {
        return vec![false; (GRID_WIDTH * GRID_HEIGHT) as usize];
    };
    let width = x1 - x0 + 1;
    let height = bottom - top + 1;

    let mut grid = Vec::with_capacity((GRID_WIDTH * GRID_HEIGHT) as usize);
    for gy in 0..GRID_HEIGHT {
        let y = top + ((2 * gy + 1) * height) / (2 * GRID_HEIGHT);
        for gx in 0..GRID_WIDTH {
            let x = x0 + ((2 * gx + 1) * width) / (2 * GRID_WIDTH);
            grid.push(is_ink(image, x, y));
        }
    }
    grid
}

/// Render digits in the built-in font, `scale` pixels per font pixel,
/// one blank font column between glyphs and a one-glyph margin
#[cfg(test)]
pub(crate) fn render_digits(
    text: &str,
    scale: u32,
    fg: image::Rgba<u8>,
    bg: image::Rgba<u8>,
) -> RgbaImage {
    let cell = (font::WIDTH as u32 + 1) * scale;
    let margin = 2 * scale;
    let width = margin * 2 + cell * text.len() as u32;
    let height = margin * 2 + font::HEIGHT as u32 * scale;
    let digits: Vec<usize> = text.bytes().map(|b| (b - b'0') as usize).collect();

    RgbaImage::from_fn(width, height, |x, y| {
        if x < margin || y < margin || y >= height - margin || x >= width - margin {
            return bg;
        }
        let (cx, cy) = (x - margin, y - margin);
        let idx = (cx / cell) as usize;
        let fx = ((cx % cell) / scale) as usize;
        let fy = (cy / scale) as usize;
        if fx < font::WIDTH && font::is_set(digits[idx], fx, fy) {
            fg
        } else {
            bg
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::matching::Template;
    use image::{ImageBuffer, Rgba};

    const WHITE: Rgba<u8> = Rgba([240, 240, 240, 255]);
    const SLATE: Rgba<u8> = Rgba([40, 44, 52, 255]);

    #[test]
    fn test_read_rendered_digits() {
        let reader = DigitReader::new();
        let region = render_digits("123456", 3, WHITE, SLATE);

        assert_eq!(reader.read_digits(&region), Reading::Value(123456));
    }

    #[test]
    fn test_read_every_digit() {
        let reader = DigitReader::new();
        let region = render_digits("9876543210", 2, WHITE, SLATE);

        assert_eq!(reader.read_digits(&region), Reading::Value(9876543210));
    }

    #[test]
    fn test_black_region_is_unreadable() {
        let reader = DigitReader::new();
        let black: RgbaImage = ImageBuffer::from_fn(120, 40, |_, _| Rgba([0, 0, 0, 255]));

        assert_eq!(reader.read_digits(&black), Reading::Unreadable);
    }

    #[test]
    fn test_dim_digits_below_floor_are_unreadable() {
        let reader = DigitReader::new().with_bright_floor(200);
        let region = render_digits("42", 3, Rgba([180, 180, 180, 255]), SLATE);

        assert_eq!(reader.read_digits(&region), Reading::Unreadable);
    }

    #[test]
    fn test_neutral_pass_rejects_tinted_background() {
        let reader = DigitReader::new();
        // Bright yellow background covers most of the region
        let region = render_digits("7", 4, WHITE, Rgba([250, 230, 170, 255]));

        let binary = reader.binarize(&region);
        assert_eq!(binary.get_pixel(0, 0)[0], 255);
        assert_eq!(reader.read_digits(&region), Reading::Value(7));
    }

    #[test]
    fn test_neutral_pass_skipped_for_clean_reads() {
        let reader = DigitReader::new();
        // Slightly warm digits on a dark background stay in the mask
        let region = render_digits("5", 4, Rgba([255, 210, 170, 255]), SLATE);

        assert_eq!(reader.read_digits(&region), Reading::Value(5));
    }

    #[test]
    fn test_separators_are_ignored() {
        let recognizer = GlyphRecognizer::new();
        let mut binary = DigitReader::new().binarize(&render_digits("12", 3, WHITE, SLATE));
        // A comma-sized blob at the bottom right of the line
        let (w, h) = binary.dimensions();
        for y in h - 9..h - 6 {
            for x in w - 5..w - 2 {
                binary.put_pixel(x, y, Luma([0]));
            }
        }

        assert_eq!(recognizer.recognize_line(&binary), "12");
    }

    #[test]
    fn test_recognizer_from_library() {
        let mut library = TemplateLibrary::new();
        for d in 0..10u8 {
            let label = char::from(b'0' + d).to_string();
            let image = render_digits(&label, 2, Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]));
            library.insert(Template::from_rgba(&label, &image));
        }

        let recognizer = GlyphRecognizer::from_library(&library).unwrap();
        let reader = DigitReader::with_recognizer(Box::new(recognizer));
        let region = render_digits("2024", 5, WHITE, SLATE);

        assert_eq!(reader.read_digits(&region), Reading::Value(2024));
    }

    #[test]
    fn test_recognizer_rejects_bad_labels() {
        let library = TemplateLibrary::new().with(Template {
            label: "ten".to_string(),
            image: ImageBuffer::from_fn(5, 7, |_, _| Luma([0])),
        });

        assert!(matches!(
            GlyphRecognizer::from_library(&library),
            Err(VisionError::InvalidGlyph(_))
        ));
    }

    #[test]
    fn test_engine_from_settings_uses_glyph_library() {
        let mut library = TemplateLibrary::new();
        for d in 0..10u8 {
            let label = char::from(b'0' + d).to_string();
            let image = render_digits(&label, 2, Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]));
            library.insert(Template::from_rgba(&label, &image));
        }

        let engine = engine_from_settings(&DigitSettings::default(), Some(&library)).unwrap();
        let reader = DigitReader::with_recognizer(engine);
        let region = render_digits("307", 4, WHITE, SLATE);
        assert_eq!(reader.read_digits(&region), Reading::Value(307));
    }

    #[test]
    fn test_engine_from_settings_rejects_bad_glyphs() {
        let library = TemplateLibrary::new().with(Template {
            label: "x".to_string(),
            image: ImageBuffer::from_fn(5, 7, |_, _| Luma([0])),
        });

        let result = engine_from_settings(&DigitSettings::default(), Some(&library));
        assert!(matches!(result, Err(VisionError::InvalidGlyph(_))));
    }

    #[cfg(not(feature = "tesseract"))]
    #[test]
    fn test_tesseract_engine_needs_feature() {
        let settings = DigitSettings {
            engine: DigitEngine::Tesseract,
            ..Default::default()
        };

        let result = engine_from_settings(&settings, None);
        assert!(matches!(
            result,
            Err(VisionError::EngineUnavailable(ref name)) if name == "tesseract"
        ));
    }

    #[test]
    fn test_overflowing_value_is_unreadable() {
        let reader = DigitReader::new();
        let region = render_digits("99999999999999999999999", 1, WHITE, SLATE);

        assert_eq!(reader.read_digits(&region), Reading::Unreadable);
    }
}
