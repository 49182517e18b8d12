//! Parameter types for normalization.
//!
//! These structs describe *what* the normalizer should produce, not *how*.
//! They are built once from [`FrameConfig`](crate::config::FrameConfig) and
//! shared by every upload, so two files normalized under the same config are
//! framed identically.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`FrameSpec`]: Panel geometry, fill colour, palette and pre-processing switches.
//! - [`ThumbnailSpec`]: Gallery preview width and JPEG quality.
//! - [`DecodeLimits`]: Upper bounds that keep adversarial uploads from exhausting memory.

use super::palette::Palette;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Geometry and colour treatment of the panel-sized output.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    /// Letterbox fill, RGB.
    pub background: [u8; 3],
    pub palette: Palette,
    /// Rotate 90° when image and panel orientation disagree.
    pub auto_rotate: bool,
    /// Contrast/brightness/sharpness boost for LCD panels.
    pub enhance: bool,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            background: [255, 255, 255],
            palette: Palette::Spectra6,
            auto_rotate: false,
            enhance: false,
        }
    }
}

/// Gallery thumbnail settings. Height follows the panel aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailSpec {
    pub width: u32,
    pub quality: Quality,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            width: 320,
            quality: Quality::default(),
        }
    }
}

/// Bounds applied before any pixel data is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest accepted `width * height` of the decoded source.
    pub max_pixels: u64,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_pixels: 50_000_000,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}
