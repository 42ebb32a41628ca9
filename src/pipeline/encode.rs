//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! Pages travel through the pipeline as PNG bytes (the [`PageRecord`] image),
//! so the trigger classifier can inspect pixel statistics and the OCR call can
//! forward the exact same bytes. PNG keeps rendered text crisp; JPEG artefacts
//! around glyphs degrade OCR accuracy.
//!
//! [`PageRecord`]: crate::pipeline::render::PageRecord

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes as a base64 image attachment for the vision API.
///
/// `detail: "high"` asks tiling providers to keep fine print and formulae.
pub fn to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
