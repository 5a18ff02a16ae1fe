//! Image encoding: `DynamicImage` → base64 `ImageData`, plus request sizing.
//!
//! PNG is preferred because it is lossless and printed titles stay crisp.
//! Photographic scans, however, compress badly as PNG, and Anthropic rejects
//! any single image above 5 MB of base64. Pages that exceed that limit are
//! re-encoded as JPEG.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Largest base64 payload accepted for one image.
pub const MAX_IMAGE_BASE64_BYTES: usize = 5 * 1024 * 1024;

const JPEG_QUALITY: u8 = 85;

/// Encode one rendered page as base64 PNG, or JPEG when the PNG is too big.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);

    if b64.len() <= MAX_IMAGE_BASE64_BYTES {
        debug!("Encoded page → {} bytes base64 (png)", b64.len());
        return Ok(ImageData::new(b64, "image/png").with_detail("high"));
    }

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
    let b64 = STANDARD.encode(&jpeg);
    debug!("Encoded page → {} bytes base64 (jpeg)", b64.len());
    Ok(ImageData::new(b64, "image/jpeg").with_detail("high"))
}

/// Total base64 size of the first `n` images.
fn prefix_size(images: &[ImageData], n: usize) -> usize {
    images.iter().take(n).map(|i| i.data.len()).sum()
}

/// Keep the longest page prefix, among `attempts`, that fits `budget_bytes`.
///
/// `attempts` is tried in order (e.g. `[4, 2, 1]`); when none fits, the last
/// attempt is used anyway so the model always gets at least one page.
pub fn select_within_budget(
    mut images: Vec<ImageData>,
    attempts: &[usize],
    budget_bytes: usize,
) -> Vec<ImageData> {
    let Some(&last) = attempts.last() else {
        return images;
    };
    let chosen = attempts
        .iter()
        .copied()
        .find(|&n| prefix_size(&images, n) <= budget_bytes)
        .unwrap_or(last);

    if chosen < images.len() {
        debug!(
            "Payload {} bytes over budget {}; sending {} of {} pages",
            prefix_size(&images, images.len()),
            budget_bytes,
            chosen,
            images.len()
        );
    }
    images.truncate(chosen);
    images
}
