//! Image preprocessing: validate uploads and normalize them to what the OCR
//! provider accepts (format, byte size, pixel dimensions).
//! The decoded RGB pixels of the submitted image are kept for color sampling,
//! so provider coordinates and sampled pixels share one coordinate space.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use tracing::{debug, info};

use crate::error::PipelineError;

/// Provider-side limits for submitted images.
#[derive(Debug, Clone)]
pub struct ImageLimits {
    /// Uploads smaller than this are treated as empty/corrupt.
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            min_bytes: 100,
            max_bytes: 20 * 1024 * 1024,
            min_dimension: 50,
            max_dimension: 10_000,
        }
    }
}

/// A provider-compliant image plus its decoded pixels.
#[derive(Clone)]
pub struct PreparedImage {
    /// Bytes to submit to the provider.
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    /// RGB pixels matching `bytes` (same dimensions).
    pub pixels: RgbImage,
}

impl std::fmt::Debug for PreparedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedImage")
            .field("bytes", &self.bytes.len())
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("original_width", &self.original_width)
            .field("original_height", &self.original_height)
            .finish_non_exhaustive()
    }
}

impl PreparedImage {
    pub fn was_resized(&self) -> bool {
        self.width != self.original_width || self.height != self.original_height
    }
}

/// Validate and normalize raw upload bytes.
///
/// `declared_mime` is advisory: the format is always detected from magic bytes.
pub fn prepare(
    raw: &[u8],
    declared_mime: Option<&str>,
    limits: &ImageLimits,
) -> Result<PreparedImage, PipelineError> {
    if raw.len() < limits.min_bytes {
        return Err(PipelineError::InvalidImage(format!(
            "image is {} bytes, below the {} byte minimum",
            raw.len(),
            limits.min_bytes
        )));
    }
    if raw.len() > limits.max_bytes {
        return Err(PipelineError::InvalidImage(format!(
            "image is {} bytes, above the {} byte maximum",
            raw.len(),
            limits.max_bytes
        )));
    }

    let format = image::guess_format(raw).map_err(|_| {
        PipelineError::UnsupportedFormat(format!(
            "unrecognized image data (declared {})",
            declared_mime.unwrap_or("unknown")
        ))
    })?;
    if !is_decodable(format) {
        return Err(PipelineError::UnsupportedFormat(format!("{format:?}")));
    }
    if let Some(mime) = declared_mime {
        if mime != format.to_mime_type() {
            debug!(declared = mime, detected = format.to_mime_type(), "declared_mime_mismatch");
        }
    }

    let decoded = image::load_from_memory_with_format(raw, format)
        .map_err(|e| PipelineError::InvalidImage(format!("failed to decode {format:?}: {e}")))?;
    let (original_width, original_height) = decoded.dimensions();
    if original_width == 0 || original_height == 0 {
        return Err(PipelineError::InvalidImage("image has zero area".into()));
    }

    let target = compliant_dimensions(original_width, original_height, limits)?;
    let (image, bytes, format) = match target {
        Some((w, h)) => {
            info!(
                from_w = original_width,
                from_h = original_height,
                to_w = w,
                to_h = h,
                "image_rescaled"
            );
            let resized = decoded.resize_exact(w, h, FilterType::CatmullRom);
            let bytes = encode_png(&resized)?;
            (resized, bytes, ImageFormat::Png)
        }
        None if is_provider_format(format) => (decoded, raw.to_vec(), format),
        None => {
            debug!(format = ?format, "transcoding_to_png");
            let bytes = encode_png(&decoded)?;
            (decoded, bytes, ImageFormat::Png)
        }
    };

    if bytes.len() > limits.max_bytes {
        return Err(PipelineError::InvalidImage(format!(
            "normalized image is {} bytes, above the {} byte maximum",
            bytes.len(),
            limits.max_bytes
        )));
    }

    let (width, height) = image.dimensions();
    Ok(PreparedImage {
        bytes,
        format,
        width,
        height,
        original_width,
        original_height,
        pixels: image.to_rgb8(),
    })
}

/// Returns the rescaled `(width, height)` when the image is out of bounds,
/// `None` when it already complies. Aspect ratio is preserved within rounding.
pub fn compliant_dimensions(
    width: u32,
    height: u32,
    limits: &ImageLimits,
) -> Result<Option<(u32, u32)>, PipelineError> {
    let (min, max) = (limits.min_dimension, limits.max_dimension);
    let short = width.min(height);
    let long = width.max(height);

    if short >= min && long <= max {
        return Ok(None);
    }

    // Anchor the violating side exactly on the bound, scale the other one.
    let upscale = short < min;
    let (anchor_from, anchor_to) = if upscale { (short, min) } else { (long, max) };
    let scale = anchor_to as f64 / anchor_from as f64;
    let apply = |v: u32| {
        if v == anchor_from {
            return anchor_to;
        }
        let scaled = v as f64 * scale;
        let rounded = if upscale { scaled.ceil() } else { scaled.floor() };
        rounded.max(1.0) as u32
    };
    let (w, h) = (apply(width), apply(height));

    if w.min(h) < min || w.max(h) > max {
        return Err(PipelineError::InvalidImage(format!(
            "{width}x{height} cannot be scaled into {min}..={max} per side without distortion"
        )));
    }
    Ok(Some((w, h)))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| PipelineError::InvalidImage(format!("failed to re-encode image: {e}")))?;
    Ok(buf)
}

/// Formats the provider accepts as-is.
fn is_provider_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff
    )
}

/// Formats we can decode (and transcode when the provider rejects them).
fn is_decodable(format: ImageFormat) -> bool {
    is_provider_format(format) || matches!(format, ImageFormat::Gif | ImageFormat::WebP)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        encode_png(&img).unwrap()
    }

    #[test]
    fn undersized_image_is_upscaled_preserving_aspect() {
        let limits = ImageLimits { min_bytes: 10, ..ImageLimits::default() };
        let prepared = prepare(&png_bytes(30, 30, [255, 255, 255]), Some("image/png"), &limits)
            .unwrap();
        assert!(prepared.width >= 50 && prepared.height >= 50);
        assert_eq!(prepared.width, prepared.height);
        assert!(prepared.was_resized());
        assert_eq!(prepared.pixels.dimensions(), (prepared.width, prepared.height));
    }

    #[test]
    fn rectangular_upscale_keeps_ratio() {
        let limits = ImageLimits::default();
        let (w, h) = compliant_dimensions(30, 90, &limits).unwrap().unwrap();
        assert_eq!((w, h), (50, 150));
    }

    #[test]
    fn oversized_dimension_is_downscaled() {
        let limits = ImageLimits::default();
        let (w, h) = compliant_dimensions(1080, 20_000, &limits).unwrap().unwrap();
        assert_eq!(h, 10_000);
        assert_eq!(w, 540);
    }

    #[test]
    fn compliant_image_is_untouched() {
        assert!(compliant_dimensions(1080, 2400, &ImageLimits::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn extreme_aspect_ratio_is_rejected() {
        let err = compliant_dimensions(20, 9_000, &ImageLimits::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn tiny_payload_is_invalid() {
        let err = prepare(&[0x89, b'P', b'N', b'G'], None, &ImageLimits::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let junk = vec![0x42u8; 512];
        let err = prepare(&junk, Some("image/png"), &ImageLimits::default()).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn truncated_png_is_invalid() {
        let mut bytes = png_bytes(200, 200, [10, 200, 90]);
        bytes.truncate(50);
        let limits = ImageLimits { min_bytes: 10, ..ImageLimits::default() };
        let err = prepare(&bytes, Some("image/png"), &limits).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([30, 180, 90, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn gif_and_webp_are_transcoded_to_png() {
        let limits = ImageLimits { min_bytes: 10, ..ImageLimits::default() };
        let cases = [
            (ImageFormat::Gif, "image/gif"),
            (ImageFormat::WebP, "image/webp"),
        ];
        for (format, mime) in cases {
            let raw = encoded(200, 120, format);
            let prepared = prepare(&raw, Some(mime), &limits).unwrap();

            assert_eq!(prepared.format, ImageFormat::Png, "{format:?}");
            assert_eq!(image::guess_format(&prepared.bytes).unwrap(), ImageFormat::Png);
            assert_eq!((prepared.width, prepared.height), (200, 120));
            assert!(!prepared.was_resized());
        }
    }

    #[test]
    fn compliant_png_passes_through() {
        let bytes = png_bytes(400, 800, [236, 229, 221]);
        let prepared = prepare(&bytes, Some("image/png"), &ImageLimits::default()).unwrap();
        assert_eq!(prepared.bytes, bytes);
        assert_eq!(prepared.format, ImageFormat::Png);
        assert!(!prepared.was_resized());
    }
}
