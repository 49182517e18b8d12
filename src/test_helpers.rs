//! Shared test utilities for the photoframe test suite.
//!
//! Provides an isolated ready set and in-memory image fixtures so unit tests
//! never depend on files checked into the repository.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (tmp, store) = temp_store();
//! store.publish(&id("a"), &frame_bmp(80, 48), b"thumb").unwrap();
//! let upload = jpeg_with_orientation(60, 20, 6);
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tempfile::TempDir;

use crate::store::ReadySet;
use crate::types::ImageId;

// =========================================================================
// Store fixtures
// =========================================================================

/// Parse an id. Panics on invalid input.
pub fn id(raw: &str) -> ImageId {
    ImageId::parse(raw).unwrap_or_else(|e| panic!("bad test id: {e}"))
}

/// Empty ready set under a fresh temp directory.
///
/// Images live in `photos_ready/`, thumbnails in `thumbs/`; callers may put
/// intake or state directories next to them under `tmp.path()`.
pub fn temp_store() -> (TempDir, ReadySet) {
    let tmp = TempDir::new().unwrap();
    let store = ReadySet::open(tmp.path().join("photos_ready"), tmp.path().join("thumbs")).unwrap();
    (tmp, store)
}

// =========================================================================
// Image fixtures
// =========================================================================

/// A non-uniform test pattern, so resizes and dithers have something to do.
fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(gradient(width, height))
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90))
        .unwrap();
    buf
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(gradient(width, height), ImageFormat::Png)
}

/// An uncompressed BMP of the given size, the format the ready set holds.
pub fn frame_bmp(width: u32, height: u32) -> Vec<u8> {
    encode(gradient(width, height), ImageFormat::Bmp)
}

/// A JPEG carrying an EXIF orientation tag.
///
/// The pixels are stored `width`x`height`; orientations 5-8 mean a viewer
/// should show them transposed.
pub fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let jpeg = jpeg_bytes(width, height);
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "encoder did not emit SOI");

    let mut exif = Vec::new();
    exif.extend_from_slice(b"Exif\0\0");
    // Big-endian TIFF header, first IFD at offset 8.
    exif.extend_from_slice(b"MM\x00\x2a\x00\x00\x00\x08");
    // One entry: Orientation (0x0112), SHORT, count 1, value left-justified.
    exif.extend_from_slice(&1u16.to_be_bytes());
    exif.extend_from_slice(&0x0112u16.to_be_bytes());
    exif.extend_from_slice(&3u16.to_be_bytes());
    exif.extend_from_slice(&1u32.to_be_bytes());
    exif.extend_from_slice(&orientation.to_be_bytes());
    exif.extend_from_slice(&[0, 0]);
    // No next IFD.
    exif.extend_from_slice(&0u32.to_be_bytes());

    let mut out = Vec::with_capacity(jpeg.len() + exif.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(&exif);
    out.extend_from_slice(&jpeg[2..]);
    out
}
