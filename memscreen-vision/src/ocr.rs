use image::{DynamicImage, RgbaImage};
use memscreen_core::Language;
use rusty_tesseract::{Args, Image};

use crate::error::{Error, Result};
use crate::frame_source::Frame;

/// Runs OCR over one captured frame. `languages` controls which tesseract
/// language packs are combined (e.g. `eng+spa`); an empty slice falls back
/// to English.
pub fn run_ocr(frame: &Frame, languages: &[Language]) -> Result<String> {
    let buffer = RgbaImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| Error::CaptureFailed("frame buffer size does not match its width/height".into()))?;
    let dynamic = DynamicImage::ImageRgba8(buffer);
    let image = Image::from_dynamic_image(&dynamic).map_err(|e| Error::CaptureFailed(e.to_string()))?;

    let lang = if languages.is_empty() {
        "eng".to_string()
    } else {
        languages
            .iter()
            .map(Language::tesseract_code)
            .collect::<Vec<_>>()
            .join("+")
    };

    let args = Args {
        lang,
        ..Args::default()
    };

    rusty_tesseract::image_to_string(&image, &args).map_err(|e| Error::CaptureFailed(e.to_string()))
}
