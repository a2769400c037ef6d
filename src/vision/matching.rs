//! Template matching against labelled reference images
//!
//! Identifies which boss a badge region belongs to and checks whether a slot
//! indicator (such as the "open sign" banner) is visible.

use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use imageproc::integral_image::{integral_image, integral_squared_image};
use imageproc::template_matching::{match_template, MatchTemplateMethod};

use super::layout::Rect;
use super::VisionError;

/// Default score above which an indicator counts as present
pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.70;

/// Default score below which an identity match is logged as low confidence
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f32 = 0.50;

/// A labelled reference image
#[derive(Debug, Clone)]
pub struct Template {
    pub label: String,
    pub image: GrayImage,
}

impl Template {
    /// Create a template from a color image
    pub fn from_rgba(label: &str, image: &RgbaImage) -> Self {
        Self {
            label: label.to_string(),
            image: image::imageops::grayscale(image),
        }
    }
}

/// Read-only set of templates, kept sorted by label
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: Vec<Template>,
}

impl TemplateLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, replacing any previous one with the same label
    pub fn insert(&mut self, template: Template) {
        match self
            .templates
            .binary_search_by(|t| t.label.as_str().cmp(&template.label))
        {
            Ok(pos) => self.templates[pos] = template,
            Err(pos) => self.templates.insert(pos, template),
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, template: Template) -> Self {
        self.insert(template);
        self
    }

    /// Look up a template by label
    pub fn get(&self, label: &str) -> Option<&Template> {
        self.templates
            .binary_search_by(|t| t.label.as_str().cmp(label))
            .ok()
            .map(|pos| &self.templates[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Outcome of matching a region against a library
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: String,
    pub score: f32,
}

/// Best placement of a template inside a region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Located {
    pub score: f32,
    /// Template footprint in region coordinates
    pub bounds: Rect,
}

/// Template matcher with configurable thresholds
pub struct VisualMatcher {
    /// Score above which an indicator counts as present
    presence_threshold: f32,
    /// Score below which identity matches are reported as weak
    low_confidence_threshold: f32,
}

impl VisualMatcher {
    /// Create a matcher with default thresholds
    pub fn new() -> Self {
        Self {
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }

    /// Set the presence threshold
    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }

    /// Set the low-confidence reporting threshold
    pub fn with_low_confidence_threshold(mut self, threshold: f32) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    pub fn presence_threshold(&self) -> f32 {
        self.presence_threshold
    }

    /// Pick the template that best matches the region.
    ///
    /// There is no minimum score: the best template always wins, however
    /// weak. Weak winners are logged so they can be spotted in review.
    pub fn best_match(
        &self,
        region: &RgbaImage,
        library: &TemplateLibrary,
    ) -> Result<MatchResult, VisionError> {
        if library.is_empty() {
            return Err(VisionError::NoTemplates);
        }

        let gray = image::imageops::grayscale(region);
        let mut best: Option<MatchResult> = None;

        for template in library.iter() {
            let score = correlation_score(&gray, &template.image, &template.label)?;
            log::debug!("Template {}: score {:.3}", template.label, score);

            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(MatchResult {
                    label: template.label.clone(),
                    score,
                });
            }
        }

        let best = best.ok_or(VisionError::NoTemplates)?;
        if best.score < self.low_confidence_threshold {
            log::warn!(
                "Low-confidence match: {} (score {:.3} < {:.2})",
                best.label,
                best.score,
                self.low_confidence_threshold
            );
        }

        Ok(best)
    }

    /// Whether the indicator template appears anywhere in the region
    pub fn is_present(
        &self,
        region: &RgbaImage,
        indicator: &Template,
    ) -> Result<bool, VisionError> {
        let gray = image::imageops::grayscale(region);
        let score = correlation_score(&gray, &indicator.image, &indicator.label)?;
        log::debug!("Indicator {}: score {:.3}", indicator.label, score);
        Ok(score > self.presence_threshold)
    }

    /// Find where a template sits in the region, if it scores above `min_score`
    pub fn locate(
        &self,
        region: &RgbaImage,
        template: &Template,
        min_score: f32,
    ) -> Result<Option<Located>, VisionError> {
        let gray = image::imageops::grayscale(region);
        let peak = correlation_peak(&gray, &template.image, &template.label)?;
        log::debug!(
            "Badge {}: score {:.3} at ({}, {})",
            template.label,
            peak.score,
            peak.bounds.x,
            peak.bounds.y
        );
        Ok((peak.score > min_score).then_some(peak))
    }
}

impl Default for VisualMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Best zero-mean normalized cross-correlation of `template` over every
/// placement inside `region`, in -1.0..=1.0.
pub fn correlation_score(
    region: &GrayImage,
    template: &GrayImage,
    label: &str,
) -> Result<f32, VisionError> {
    correlation_peak(region, template, label).map(|peak| peak.score)
}

/// Highest-scoring placement of `template` inside `region`. The first
/// placement in row order wins ties.
///
/// Placements where either window is flat carry no signal and score 0.
pub fn correlation_peak(
    region: &GrayImage,
    template: &GrayImage,
    label: &str,
) -> Result<Located, VisionError> {
    let (rw, rh) = region.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > rw || th > rh {
        return Err(VisionError::TemplateTooLarge {
            label: label.to_string(),
            template: (tw, th),
            region: (rw, rh),
        });
    }

    let n = f64::from(tw * th);
    let (t_sum, t_sq) = template.pixels().fold((0.0f64, 0.0f64), |(s, q), p| {
        let v = f64::from(p[0]);
        (s + v, q + v * v)
    });
    let t_var = t_sq - t_sum * t_sum / n;

    let cross = match_template(region, template, MatchTemplateMethod::CrossCorrelation);
    let sums = integral_image::<_, u64>(region);
    let squares = integral_squared_image::<_, u64>(region);

    let mut best = Located {
        score: f32::MIN,
        bounds: Rect::new(0, 0, tw, th),
    };
    for (x, y, p) in cross.enumerate_pixels() {
        let i_sum = window_sum(&sums, x, y, tw, th) as f64;
        let i_sq = window_sum(&squares, x, y, tw, th) as f64;
        let i_var = i_sq - i_sum * i_sum / n;

        let denom = (i_var * t_var).sqrt();
        let score = if denom > 1e-6 {
            ((f64::from(p[0]) - i_sum * t_sum / n) / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        if score as f32 > best.score {
            best = Located {
                score: score as f32,
                bounds: Rect::new(x, y, tw, th),
            };
        }
    }

    Ok(best)
}

/// Sum of the `w` x `h` window at (x, y) from an integral image whose
/// first row and column are zero
fn window_sum(integral: &ImageBuffer<Luma<u64>, Vec<u64>>, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let a = integral.get_pixel(x, y)[0];
    let b = integral.get_pixel(x + w, y)[0];
    let c = integral.get_pixel(x, y + h)[0];
    let d = integral.get_pixel(x + w, y + h)[0];
    (d + a) - (b + c)
}
