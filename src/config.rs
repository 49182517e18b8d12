//! Frame configuration module.
//!
//! Handles loading, validating, and merging `photoframe.toml`. Stock defaults
//! are overridden by the user file; the file is optional and may be sparse.
//!
//! ## Directory Layout
//!
//! All data lives under `paths.root` (relative roots resolve against the
//! directory holding the config file):
//!
//! ```text
//! photos/
//! ├── photos_src/      # Intake: raw uploads while they are being normalized
//! ├── photos_ready/    # <id>.bmp, panel-sized frames
//! ├── thumbs/          # <id>.jpg, gallery previews
//! ├── state/
//! │   ├── rotation.json         # Cursor record
//! │   ├── render.lock           # Held while a render runs
//! │   └── render-history.jsonl  # One line per render
//! └── current.bmp      # Written by the mirror renderer
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [paths]
//! root = "photos"
//!
//! [display]
//! width = 800
//! height = 480
//! palette = "spectra6"       # spectra6 | black-white | full-color
//! background = "#ffffff"
//! auto_rotate = false
//! enhance = false
//!
//! [thumbnails]
//! width = 320
//! quality = 85
//!
//! [renderer]
//! mode = "command"           # command | mirror
//! program = "python3"
//! args = ["epaper_show.py", "{image}"]
//! ```
//!
//! See [`stock_config_toml`] for every key. Unknown keys are rejected to
//! catch typos early.

use crate::imaging::{DecodeLimits, FrameSpec, Palette, Quality, ThumbnailSpec};
use crate::render::HISTORY_FILENAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Frame configuration loaded from `photoframe.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameConfig {
    /// Where images and state live.
    pub paths: PathsConfig,
    /// Target panel geometry and colour treatment.
    pub display: DisplayConfig,
    /// Gallery preview settings.
    pub thumbnails: ThumbnailsConfig,
    /// Upload size and decode bounds.
    pub limits: LimitsConfig,
    /// External HEIC/AVIF converter.
    pub converter: ConverterConfig,
    /// How a frame reaches the panel.
    pub renderer: RendererConfig,
    /// Render job settings.
    pub render: RenderConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl FrameConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Validation(
                "display.width and display.height must be non-zero".into(),
            ));
        }
        if parse_hex_color(&self.display.background).is_none() {
            return Err(ConfigError::Validation(format!(
                "display.background must be #rrggbb, got {:?}",
                self.display.background
            )));
        }
        if self.thumbnails.width == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.width must be non-zero".into(),
            ));
        }
        if self.thumbnails.quality == 0 || self.thumbnails.quality > 100 {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 1-100".into(),
            ));
        }
        if self.limits.max_pixels == 0 || self.limits.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "limits.max_pixels and limits.max_upload_bytes must be non-zero".into(),
            ));
        }
        if self.converter.enabled {
            if self.converter.program.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "converter.program must not be empty when the converter is enabled".into(),
                ));
            }
            if self.converter.timeout_secs == 0 {
                return Err(ConfigError::Validation(
                    "converter.timeout_secs must be non-zero".into(),
                ));
            }
        }
        match self.renderer.mode {
            RendererMode::Command => {
                if self.renderer.program.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "renderer.program must not be empty in command mode".into(),
                    ));
                }
                if self.renderer.timeout_secs == 0 {
                    return Err(ConfigError::Validation(
                        "renderer.timeout_secs must be non-zero".into(),
                    ));
                }
            }
            RendererMode::Mirror => {
                if self.renderer.mirror_path.as_os_str().is_empty() {
                    return Err(ConfigError::Validation(
                        "renderer.mirror_path must not be empty in mirror mode".into(),
                    ));
                }
            }
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Panel frame parameters for the normalizer.
    pub fn frame_spec(&self) -> FrameSpec {
        FrameSpec {
            width: self.display.width,
            height: self.display.height,
            background: parse_hex_color(&self.display.background).unwrap_or([255, 255, 255]),
            palette: self.display.palette,
            auto_rotate: self.display.auto_rotate,
            enhance: self.display.enhance,
        }
    }

    pub fn thumbnail_spec(&self) -> ThumbnailSpec {
        ThumbnailSpec {
            width: self.thumbnails.width,
            quality: Quality::new(self.thumbnails.quality),
        }
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_pixels: self.limits.max_pixels,
            max_upload_bytes: self.limits.max_upload_bytes,
        }
    }

    /// Resolve every directory against `base`, the config file's directory.
    pub fn layout(&self, base: &Path) -> Layout {
        let root = base.join(&self.paths.root);
        Layout {
            source: root.join(&self.paths.source_dir),
            ready: root.join(&self.paths.ready_dir),
            thumbs: root.join(&self.paths.thumbs_dir),
            state: root.join(&self.paths.state_dir),
            mirror: root.join(&self.renderer.mirror_path),
            root,
        }
    }
}

/// Resolved directories of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub source: PathBuf,
    pub ready: PathBuf,
    pub thumbs: PathBuf,
    pub state: PathBuf,
    pub mirror: PathBuf,
}

impl Layout {
    pub fn history_path(&self) -> PathBuf {
        self.state.join(HISTORY_FILENAME)
    }
}

/// Directory names. `root` may be absolute; the others are relative to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub root: PathBuf,
    pub source_dir: String,
    pub ready_dir: String,
    pub thumbs_dir: String,
    pub state_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("photos"),
            source_dir: "photos_src".to_string(),
            ready_dir: "photos_ready".to_string(),
            thumbs_dir: "thumbs".to_string(),
            state_dir: "state".to_string(),
        }
    }
}

/// Target panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Panel width in pixels.
    pub width: u32,
    /// Panel height in pixels.
    pub height: u32,
    /// Inks the panel can show.
    pub palette: Palette,
    /// Letterbox colour as `#rrggbb`.
    pub background: String,
    /// Rotate images whose orientation differs from the panel's.
    pub auto_rotate: bool,
    /// Contrast/brightness/sharpness boost for LCD panels.
    pub enhance: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            palette: Palette::Spectra6,
            background: "#ffffff".to_string(),
            auto_rotate: false,
            enhance: false,
        }
    }
}

/// Gallery thumbnails. Height follows the panel aspect ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub width: u32,
    /// JPEG quality (1 = worst, 100 = best).
    pub quality: u32,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            width: 320,
            quality: 85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest decoded `width * height` accepted.
    pub max_pixels: u64,
    /// Largest upload accepted, in bytes.
    pub max_upload_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = DecodeLimits::default();
        Self {
            max_pixels: limits.max_pixels,
            max_upload_bytes: limits.max_upload_bytes,
        }
    }
}

/// External converter for formats the `image` crate cannot decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterConfig {
    pub enabled: bool,
    pub program: String,
    /// Arguments; `{input}` and `{output}` are replaced with temp file paths.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "heif-convert".to_string(),
            args: vec!["{input}".to_string(), "{output}".to_string()],
            timeout_secs: 60,
        }
    }
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererMode {
    /// Run a driver program.
    Command,
    /// Copy the frame to `mirror_path`.
    Mirror,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub mode: RendererMode,
    pub program: String,
    /// Arguments; `{image}` is replaced with the frame's path.
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Mirror target, relative to `paths.root` unless absolute.
    pub mirror_path: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mode: RendererMode::Command,
            program: "python3".to_string(),
            args: vec!["epaper_show.py".to_string(), "{image}".to_string()],
            timeout_secs: 120,
            mirror_path: PathBuf::from("current.bmp"),
        }
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Append a line per run to `state/render-history.jsonl`.
    pub history: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { history: true }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel normalization workers for batch ingest.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Parse `#rrggbb` into RGB.
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(FrameConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<FrameConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: FrameConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the stock defaults.
pub fn load_config(path: &Path) -> Result<FrameConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `photoframe.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Photoframe Configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Paths
# ---------------------------------------------------------------------------
[paths]
# Data root. Relative paths resolve against this file's directory.
root = "photos"

# Subdirectories of root.
source_dir = "photos_src"     # raw uploads while being normalized
ready_dir = "photos_ready"    # panel-sized frames (<id>.bmp)
thumbs_dir = "thumbs"         # gallery previews (<id>.jpg)
state_dir = "state"           # rotation record, render lock, history

# ---------------------------------------------------------------------------
# Display panel
# ---------------------------------------------------------------------------
[display]
# Panel resolution. Every image is fit into exactly this size.
width = 800
height = 480

# Inks the panel can show:
#   "spectra6"    six-colour e-paper (white, black, red, yellow, blue, green)
#   "black-white" monochrome e-paper
#   "full-color"  LCD/IPS, no dithering
palette = "spectra6"

# Letterbox fill colour.
background = "#ffffff"

# Rotate images 90 degrees when their orientation differs from the panel's.
auto_rotate = false

# Boost contrast, brightness and sharpness (useful for LCD panels).
enhance = false

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# Width in pixels; height follows the panel aspect ratio.
width = 320

# JPEG quality (1 = worst, 100 = best).
quality = 85

# ---------------------------------------------------------------------------
# Limits
# ---------------------------------------------------------------------------
[limits]
# Largest decoded image accepted, in pixels (width * height).
max_pixels = 50000000

# Largest upload accepted, in bytes.
max_upload_bytes = 67108864

# ---------------------------------------------------------------------------
# Converter for HEIC/HEIF and AVIF uploads
# ---------------------------------------------------------------------------
[converter]
enabled = true
program = "heif-convert"
# {input} and {output} are replaced with temp file paths; output must be PNG.
args = ["{input}", "{output}"]
timeout_secs = 60

# ---------------------------------------------------------------------------
# Renderer
# ---------------------------------------------------------------------------
[renderer]
# "command" runs a driver program, "mirror" copies the frame to mirror_path.
mode = "command"
program = "python3"
# {image} is replaced with the path of the frame to show.
args = ["epaper_show.py", "{image}"]
timeout_secs = 120
# Relative to paths.root unless absolute.
mirror_path = "current.bmp"

# ---------------------------------------------------------------------------
# Render job
# ---------------------------------------------------------------------------
[render]
# Append one JSON line per render to state/render-history.jsonl.
history = true

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for batch ingest.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
