//! Content-based format detection.
//!
//! Uploads arrive with a filename and a browser-supplied MIME type, neither
//! of which is trustworthy. The format is decided from the leading bytes:
//! the `image` crate's signature table for the formats it decodes natively,
//! plus an ISO-BMFF `ftyp` brand check for HEIF-family containers (HEIC from
//! phones, AVIF) that have to go through the external converter.

use image::ImageFormat;

/// `ftyp` major/compatible brands of HEIF-coded still images.
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx", b"hevm", b"hevs", b"mif1", b"msf1",
];
const AVIF_BRANDS: &[&[u8; 4]] = &[b"avif", b"avis"];

/// What the upload actually is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Decodable in-process by the `image` crate.
    Native(ImageFormat),
    /// HEIF/HEIC container, needs the converter.
    Heif,
    /// AVIF container, needs the converter.
    Avif,
}

impl SourceFormat {
    /// Whether decoding requires the external conversion capability.
    pub fn needs_conversion(self) -> bool {
        matches!(self, SourceFormat::Heif | SourceFormat::Avif)
    }

    /// Canonical MIME type, used to compare against the declared type.
    pub fn mime_type(self) -> &'static str {
        match self {
            SourceFormat::Native(fmt) => fmt.to_mime_type(),
            SourceFormat::Heif => "image/heic",
            SourceFormat::Avif => "image/avif",
        }
    }

    /// File extension used for the intake copy and converter input.
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Native(fmt) => fmt.extensions_str().first().copied().unwrap_or("img"),
            SourceFormat::Heif => "heic",
            SourceFormat::Avif => "avif",
        }
    }
}

/// Identify the format of `bytes`, or `None` if nothing matches.
pub fn detect_format(bytes: &[u8]) -> Option<SourceFormat> {
    if let Some(bmff) = detect_bmff(bytes) {
        return Some(bmff);
    }
    image::guess_format(bytes).ok().map(SourceFormat::Native)
}

/// Inspect an ISO-BMFF `ftyp` box: `size(4) 'ftyp' major(4) minor(4) compatible(4)*`.
fn detect_bmff(bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.len() < 16 || &bytes[4..8] != b"ftyp" {
        return None;
    }
    let box_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let end = box_len.clamp(16, bytes.len());

    let mut brands = vec![&bytes[8..12]];
    brands.extend(bytes[16..end].chunks_exact(4));

    // AVIF files also list mif1, so check the AVIF brands first.
    if brands.iter().any(|b| AVIF_BRANDS.iter().any(|a| a.as_slice() == *b)) {
        return Some(SourceFormat::Avif);
    }
    if brands.iter().any(|b| HEIF_BRANDS.iter().any(|h| h.as_slice() == *b)) {
        return Some(SourceFormat::Heif);
    }
    None
}

/// Whether a declared MIME type agrees with the detected format.
///
/// Only used for diagnostics; a mismatch never changes how a file is decoded.
pub fn declared_matches(declared: &str, detected: SourceFormat) -> bool {
    let declared = declared.trim().to_ascii_lowercase();
    let canonical = detected.mime_type();
    declared == canonical
        || match detected {
            SourceFormat::Native(ImageFormat::Jpeg) => declared == "image/jpg",
            SourceFormat::Heif => declared == "image/heif",
            SourceFormat::Native(ImageFormat::Tiff) => declared == "image/tif",
            _ => false,
        }
}
