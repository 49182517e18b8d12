//! Image processing: pure Rust decoding, framing and encoding.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Detect** | `image::guess_format` + ISO-BMFF `ftyp` brands |
//! | **Convert HEIC/AVIF** | external `heif-convert` ([`CommandConverter`]) |
//! | **Decode** | `ImageReader` with EXIF orientation applied |
//! | **Frame** | Lanczos3 fit + `imageops::overlay` on a background canvas |
//! | **Quantize** | `imageops::dither` (Floyd–Steinberg) to the panel palette |
//! | **Encode** | BMP for the panel, JPEG for thumbnails |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing the target frame
//! - **Detect / Convert**: Content sniffing and the external converter seam
//! - **Normalize**: The pipeline combining all of the above

mod calculations;
pub mod convert;
pub mod detect;
pub mod normalize;
pub mod palette;
mod params;

pub use calculations::{
    calculate_center_offset, calculate_fit_dimensions, calculate_thumbnail_dimensions,
    needs_quarter_turn,
};
pub use convert::{CommandConverter, ConversionError, Converter, NoConverter};
pub use detect::{SourceFormat, detect_format};
pub use normalize::{NormalizeError, Normalized, Normalizer, fit_for_panel};
pub use palette::Palette;
pub use params::{DecodeLimits, FrameSpec, Quality, ThumbnailSpec};
