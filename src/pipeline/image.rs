//! Image validation and conversion: raw bytes → page file contents.
//!
//! Every fetched resource passes through [`validate_and_convert`] before it
//! is allowed into a chapter workspace. The function is pure: the same
//! bytes and target always give the same accept/reject decision, so a
//! chapter can be re-run without surprises.
//!
//! Colour policy:
//!
//! * PNG source, PNG target: bytes pass through untouched, alpha included.
//! * anything else: flattened to opaque RGB8, then encoded. Lossy targets
//!   never carry alpha.
//!
//! This module is CPU-bound; callers run it inside `spawn_blocking`.

use crate::config::OutputFormat;
use crate::error::ResourceError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Acceptance policy applied to every page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePolicy {
    /// Narrower images are rejected.
    pub min_width: u32,
    /// Quality for lossy encoders (1–100).
    pub quality: u8,
}

/// An accepted page, encoded in its output format.
#[derive(Debug, Clone)]
pub struct ConvertedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Format detected from the source bytes.
    pub source_format: ImageFormat,
    pub format: OutputFormat,
}

/// Decode `bytes`, apply the width policy, and encode as `target`.
///
/// Returns `Err(ResourceError::TooNarrow)` for images below the minimum
/// width, whatever their format.
pub fn validate_and_convert(
    bytes: &[u8],
    target: OutputFormat,
    policy: &ImagePolicy,
) -> Result<ConvertedImage, ResourceError> {
    let source_format =
        image::guess_format(bytes).map_err(|e| ResourceError::Decode(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, source_format)
        .map_err(|e| ResourceError::Decode(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    if width < policy.min_width {
        return Err(ResourceError::TooNarrow {
            width,
            min: policy.min_width,
        });
    }

    let encoded = match target {
        OutputFormat::Png if source_format == ImageFormat::Png => bytes.to_vec(),
        OutputFormat::Png => encode_png(&DynamicImage::ImageRgb8(img.to_rgb8()))?,
        lossy => encode_lossy(&img.to_rgb8(), lossy, policy.quality)?,
    };

    debug!(
        "Converted {:?} {}x{} → {} ({} bytes)",
        source_format,
        width,
        height,
        target,
        encoded.len()
    );

    Ok(ConvertedImage {
        bytes: encoded,
        width,
        height,
        source_format,
        format: target,
    })
}

/// Encode an opaque image in a lossy format.
///
/// `OutputFormat::Png` is accepted too and encodes losslessly, so callers
/// that only hold an `OutputFormat` need no special case.
pub fn encode_lossy(
    rgb: &RgbImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, ResourceError> {
    match format {
        OutputFormat::Jpeg => {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
                .encode_image(rgb)
                .map_err(|e| ResourceError::Encode(e.to_string()))?;
            Ok(buf)
        }
        OutputFormat::WebP => {
            let encoded = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
                .encode(f32::from(quality.clamp(1, 100)));
            Ok(encoded.to_vec())
        }
        OutputFormat::Png => encode_png(&DynamicImage::ImageRgb8(rgb.clone())),
    }
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ResourceError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ResourceError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, Rgb, Rgba, RgbaImage};

    fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([200, 30, 30]));
        encode_lossy(&img, OutputFormat::Jpeg, 90).unwrap()
    }

    fn rgba_png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 255, 128])));
        encode_png(&img).unwrap()
    }

    fn policy() -> ImagePolicy {
        ImagePolicy {
            min_width: 800,
            quality: 90,
        }
    }

    #[test]
    fn narrow_images_are_rejected_regardless_of_format() {
        for bytes in [jpeg_bytes(799, 100), rgba_png_bytes(10, 1000)] {
            for target in [OutputFormat::Jpeg, OutputFormat::WebP, OutputFormat::Png] {
                let err = validate_and_convert(&bytes, target, &policy()).unwrap_err();
                assert!(
                    matches!(err, ResourceError::TooNarrow { min: 800, .. }),
                    "got: {err:?}"
                );
            }
        }
    }

    #[test]
    fn width_at_threshold_is_accepted() {
        let out = validate_and_convert(&jpeg_bytes(800, 50), OutputFormat::Jpeg, &policy()).unwrap();
        assert_eq!((out.width, out.height), (800, 50));
        assert_eq!(out.source_format, ImageFormat::Jpeg);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn png_to_png_preserves_alpha() {
        let src = rgba_png_bytes(900, 20);
        let out = validate_and_convert(&src, OutputFormat::Png, &policy()).unwrap();
        assert_eq!(out.bytes, src);
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgba8);
    }

    #[test]
    fn lossy_target_drops_alpha() {
        let out =
            validate_and_convert(&rgba_png_bytes(900, 20), OutputFormat::Jpeg, &policy()).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
    }

    #[test]
    fn non_png_source_to_png_is_opaque() {
        let out = validate_and_convert(&jpeg_bytes(900, 20), OutputFormat::Png, &policy()).unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
    }

    #[test]
    fn webp_target_produces_webp() {
        let out = validate_and_convert(&jpeg_bytes(820, 40), OutputFormat::WebP, &policy()).unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::WebP);
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.width(), 820);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = validate_and_convert(b"<html>oops</html>", OutputFormat::Jpeg, &policy())
            .unwrap_err();
        assert!(matches!(err, ResourceError::Decode(_)));
    }

    #[test]
    fn conversion_is_repeatable() {
        let src = jpeg_bytes(1000, 30);
        let a = validate_and_convert(&src, OutputFormat::Jpeg, &policy()).unwrap();
        let b = validate_and_convert(&src, OutputFormat::Jpeg, &policy()).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }
}
