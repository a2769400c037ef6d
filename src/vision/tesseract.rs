//! Tesseract digit engine
//!
//! Runs the LSTM engine on one binarized line at a time, in single-line
//! page mode with a digits-only whitelist.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use image::{GrayImage, ImageFormat};
use leptess::{LepTess, Variable};

use super::ocr::TextRecognizer;
use super::VisionError;

/// Page segmentation mode 7: treat the image as a single text line
const SINGLE_LINE_MODE: &str = "7";

const DIGIT_WHITELIST: &str = "0123456789";

/// Text recognizer backed by libtesseract
pub struct TesseractRecognizer {
    /// Tesseract keeps per-image state, so calls are serialized
    engine: Mutex<LepTess>,
}

impl TesseractRecognizer {
    /// Start Tesseract with the trained data in `tessdata` (or its default
    /// location) for `language`
    pub fn new(tessdata: Option<&Path>, language: &str) -> Result<Self, VisionError> {
        let data_path = match tessdata {
            Some(dir) => Some(dir.to_str().ok_or_else(|| {
                VisionError::EngineInit(format!("tessdata path {:?} is not UTF-8", dir))
            })?),
            None => None,
        };

        let mut engine = LepTess::new(data_path, language).map_err(engine_init)?;
        engine
            .set_variable(Variable::TesseditPagesegMode, SINGLE_LINE_MODE)
            .map_err(engine_init)?;
        engine
            .set_variable(Variable::TesseditCharWhitelist, DIGIT_WHITELIST)
            .map_err(engine_init)?;

        log::info!("Tesseract digit engine ready (language {})", language);
        Ok(Self {
            engine: Mutex::new(engine),
        })
    }
}

fn engine_init(e: impl std::fmt::Debug) -> VisionError {
    VisionError::EngineInit(format!("{:?}", e))
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize_line(&self, binary: &GrayImage) -> String {
        let mut png = Vec::new();
        if let Err(e) = binary.write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
            log::warn!("Could not encode line for Tesseract: {}", e);
            return String::new();
        }

        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = engine.set_image_from_mem(&png) {
            log::warn!("Tesseract rejected line image: {:?}", e);
            return String::new();
        }

        engine.get_utf8_text().unwrap_or_else(|e| {
            log::warn!("Tesseract returned invalid text: {}", e);
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Reading;
    use crate::vision::ocr::render_digits;
    use crate::vision::DigitReader;
    use image::Rgba;

    #[test]
    #[ignore = "needs Tesseract trained data installed"]
    fn test_tesseract_reads_digits() {
        let engine = TesseractRecognizer::new(None, "eng").unwrap();
        let reader = DigitReader::with_recognizer(Box::new(engine));
        let region = render_digits("4096", 8, Rgba([250, 250, 250, 255]), Rgba([20, 20, 20, 255]));

        assert_eq!(reader.read_digits(&region), Reading::Value(4096));
    }
}
