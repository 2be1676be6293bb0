//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! Both the page under classification and every few-shot example go through
//! here, so the backend always sees the same encoding. Phone photos of
//! documents routinely exceed 4000 px; anything larger than the configured
//! edge is downscaled first to keep request bodies under provider limits.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::borrow::Cow;
use std::io::Cursor;
use tracing::debug;

/// Encode `img` as a base64 PNG, downscaling so neither edge exceeds
/// `max_edge` pixels (aspect ratio preserved).
pub fn encode_image(img: &DynamicImage, max_edge: u32) -> Result<ImageData, image::ImageError> {
    let img: Cow<'_, DynamicImage> = if img.width() > max_edge || img.height() > max_edge {
        debug!(
            "Downscaling {}x{} image to fit {} px",
            img.width(),
            img.height(),
            max_edge
        );
        Cow::Owned(img.resize(max_edge, max_edge, FilterType::Triangle))
    } else {
        Cow::Borrowed(img)
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
