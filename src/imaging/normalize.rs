//! The Format Normalizer: untrusted upload bytes → panel-ready bitmap.
//!
//! ```text
//! bytes ─ size check ─ detect ─┬─ native ────────────┬─ decode (limits, EXIF orientation)
//!                              └─ HEIF/AVIF ─ convert ┘
//!       ─ auto-rotate? ─ enhance? ─ fit + letterbox ─ dither ─┬─ BMP (panel)
//!                                                             └─ JPEG (thumbnail)
//! ```
//!
//! The frame policy is the same for every file: scale by
//! `min(W/w, H/h)` (up or down), center on a canvas of the background colour,
//! then reduce to the panel palette. Re-encoding drops every piece of source
//! metadata; orientation is baked into the pixels first.
//!
//! Normalization has no side effects beyond converter temp files. Publishing
//! the result is the caller's job.

use super::calculations::{
    calculate_center_offset, calculate_fit_dimensions, calculate_thumbnail_dimensions,
    needs_quarter_turn,
};
use super::convert::{CommandConverter, ConversionError, Converter};
use super::detect::{SourceFormat, declared_matches, detect_format};
use super::params::{DecodeLimits, FrameSpec, ThumbnailSpec};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("corrupt input: {0}")]
    CorruptInput(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),
    #[error("conversion failed: {0}")]
    Conversion(#[source] ConversionError),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Map decoder errors onto the normalization taxonomy.
fn classify(err: ImageError) -> NormalizeError {
    match err {
        ImageError::Unsupported(e) => NormalizeError::UnsupportedFormat(e.to_string()),
        ImageError::Limits(e) => NormalizeError::ResourceExhausted(e.to_string()),
        other => NormalizeError::CorruptInput(other.to_string()),
    }
}

/// A normalized upload, ready for [`ReadySet::publish`](crate::store::ReadySet::publish).
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Panel-sized BMP.
    pub image: Vec<u8>,
    /// JPEG preview of the same frame.
    pub thumbnail: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub source_format: SourceFormat,
    /// Size of the decoded source after orientation was applied.
    pub source_dimensions: (u32, u32),
}

/// Converts uploads into frames according to a fixed [`FrameSpec`].
pub struct Normalizer<C = CommandConverter> {
    frame: FrameSpec,
    thumbnail: ThumbnailSpec,
    limits: DecodeLimits,
    converter: C,
}

impl<C: Converter> Normalizer<C> {
    pub fn new(frame: FrameSpec, thumbnail: ThumbnailSpec, limits: DecodeLimits, converter: C) -> Self {
        Self {
            frame,
            thumbnail,
            limits,
            converter,
        }
    }

    pub fn frame_spec(&self) -> &FrameSpec {
        &self.frame
    }

    /// Reject uploads above `limits.max_upload_bytes` before any work is done.
    pub fn check_size(&self, len: u64) -> Result<(), NormalizeError> {
        if len > self.limits.max_upload_bytes {
            return Err(NormalizeError::ResourceExhausted(format!(
                "upload is {len} bytes, limit is {}",
                self.limits.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Normalize one upload. `declared` is the uploader's MIME type, used
    /// only for diagnostics.
    pub fn normalize(
        &self,
        bytes: &[u8],
        declared: Option<&str>,
    ) -> Result<Normalized, NormalizeError> {
        self.check_size(bytes.len() as u64)?;

        let format = detect_format(bytes)
            .ok_or_else(|| NormalizeError::CorruptInput("unrecognized image data".into()))?;
        if let Some(declared) = declared
            && !declared_matches(declared, format)
        {
            debug!(declared, detected = format.mime_type(), "declared type disagrees with content");
        }

        let decoded = match format {
            SourceFormat::Native(fmt) if fmt.reading_enabled() => {
                decode_oriented(ImageReader::with_format(Cursor::new(bytes), fmt), &self.limits)?
            }
            SourceFormat::Native(fmt) => {
                return Err(NormalizeError::UnsupportedFormat(format!(
                    "no decoder for {}",
                    fmt.to_mime_type()
                )));
            }
            _ => {
                let converted = self.converter.convert(bytes, format).map_err(|e| match e {
                    ConversionError::Unavailable(mime) => {
                        NormalizeError::UnsupportedFormat(format!("{mime} (no converter)"))
                    }
                    other => NormalizeError::Conversion(other),
                })?;
                let reader = ImageReader::new(Cursor::new(converted.as_slice()))
                    .with_guessed_format()
                    .map_err(|e| NormalizeError::CorruptInput(e.to_string()))?;
                decode_oriented(reader, &self.limits)?
            }
        };

        let source_dimensions = (decoded.width(), decoded.height());
        let frame = render_frame(decoded, &self.frame);

        Ok(Normalized {
            image: encode_frame(&frame)?,
            thumbnail: encode_thumbnail(&frame, &self.frame, &self.thumbnail)?,
            width: frame.width(),
            height: frame.height(),
            source_format: format,
            source_dimensions,
        })
    }
}

/// Decode with the pixel budget enforced before any pixel data is allocated,
/// then bake EXIF orientation into the pixels.
fn decode_oriented(
    reader: ImageReader<Cursor<&[u8]>>,
    limits: &DecodeLimits,
) -> Result<DynamicImage, NormalizeError> {
    let mut decoder = reader.into_decoder().map_err(classify)?;

    let (w, h) = decoder.dimensions();
    if w == 0 || h == 0 {
        return Err(NormalizeError::CorruptInput(format!("image is {w}x{h}")));
    }
    let pixels = w as u64 * h as u64;
    if pixels > limits.max_pixels {
        return Err(NormalizeError::ResourceExhausted(format!(
            "{w}x{h} is {pixels} pixels, limit is {}",
            limits.max_pixels
        )));
    }

    // Broken EXIF is not worth rejecting a photo over.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(classify)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Fit, letterbox and quantize a decoded image into a panel frame.
pub fn render_frame(img: DynamicImage, spec: &FrameSpec) -> RgbImage {
    let panel = (spec.width, spec.height);

    let img = if spec.auto_rotate && needs_quarter_turn((img.width(), img.height()), panel) {
        // Counter-clockwise, so portrait shots lie with their top on the left
        img.rotate270()
    } else {
        img
    };

    let img = if spec.enhance {
        img.adjust_contrast(20.0).brighten(12).unsharpen(0.5, 0)
    } else {
        img
    };

    let (fit_w, fit_h) = calculate_fit_dimensions((img.width(), img.height()), panel);
    let resized = img.resize_exact(fit_w, fit_h, FilterType::Lanczos3).to_rgba8();

    let [r, g, b] = spec.background;
    let mut canvas = RgbaImage::from_pixel(spec.width, spec.height, Rgba([r, g, b, 255]));
    let (x, y) = calculate_center_offset((fit_w, fit_h), panel);
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);

    let mut frame = DynamicImage::ImageRgba8(canvas).to_rgb8();
    spec.palette.quantize(&mut frame);
    frame
}

fn encode_frame(frame: &RgbImage) -> Result<Vec<u8>, NormalizeError> {
    let mut buf = Cursor::new(Vec::new());
    frame
        .write_to(&mut buf, ImageFormat::Bmp)
        .map_err(|e| NormalizeError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn encode_thumbnail(
    frame: &RgbImage,
    spec: &FrameSpec,
    thumb: &ThumbnailSpec,
) -> Result<Vec<u8>, NormalizeError> {
    let (w, h) = calculate_thumbnail_dimensions((spec.width, spec.height), thumb.width);
    let small = imageops::resize(frame, w, h, FilterType::Lanczos3);
    let mut buf = Vec::new();
    small
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, thumb.quality.value()))
        .map_err(|e| NormalizeError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Re-frame a stored image whose size no longer matches the panel, e.g.
/// after the panel resolution in the config changed.
///
/// Returns `None` when the image already fits.
pub fn fit_for_panel(bytes: &[u8], spec: &FrameSpec) -> Result<Option<Vec<u8>>, NormalizeError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| NormalizeError::CorruptInput(e.to_string()))?;
    let (w, h) = reader.into_dimensions().map_err(classify)?;
    if (w, h) == (spec.width, spec.height) {
        return Ok(None);
    }
    let img = image::load_from_memory(bytes).map_err(classify)?;
    let frame = render_frame(img, spec);
    encode_frame(&frame).map(Some)
}
