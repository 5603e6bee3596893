//! Image encoding: `DynamicImage` → base64 PNG data URL.
//!
//! PNG is lossless; JPEG artefacts around glyph edges measurably hurt OCR on
//! small print, and page images are well under request size limits anyway.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as `data:image/png;base64,…`.
pub fn encode_page(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(format!("data:image/png;base64,{b64}"))
}
