//! External conversion capability for vendor formats.
//!
//! HEIC/HEIF (iPhone default) and AVIF cannot be decoded by the pure-Rust
//! `image` stack. They are handed to a [`Converter`], which turns them into a
//! format the normalizer can decode. The production implementation shells out
//! to libheif's `heif-convert`; when no converter is configured or the program
//! is missing, conversion reports [`ConversionError::Unavailable`] and the
//! normalizer fails the upload with `UnsupportedFormat`.

use super::detect::SourceFormat;
use crate::command::{self, CommandError};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("no converter available for {0}")]
    Unavailable(&'static str),
    #[error("converter timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),
    #[error("converter failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns vendor-format bytes into bytes the `image` crate can decode.
pub trait Converter: Sync {
    fn convert(&self, bytes: &[u8], format: SourceFormat) -> Result<Vec<u8>, ConversionError>;
}

impl<C: Converter + ?Sized> Converter for Box<C> {
    fn convert(&self, bytes: &[u8], format: SourceFormat) -> Result<Vec<u8>, ConversionError> {
        (**self).convert(bytes, format)
    }
}

/// Converter used when conversion is disabled: every call is `Unavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConverter;

impl Converter for NoConverter {
    fn convert(&self, _bytes: &[u8], format: SourceFormat) -> Result<Vec<u8>, ConversionError> {
        Err(ConversionError::Unavailable(format.mime_type()))
    }
}

/// Runs an external program: `program args…` with `{input}` and `{output}`
/// replaced by temp file paths. The output is expected as PNG.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandConverter {
    /// libheif's command line tool with its default argument order.
    pub fn heif_convert(timeout: Duration) -> Self {
        Self {
            program: "heif-convert".to_string(),
            args: vec!["{input}".to_string(), "{output}".to_string()],
            timeout,
        }
    }
}

impl Converter for CommandConverter {
    fn convert(&self, bytes: &[u8], format: SourceFormat) -> Result<Vec<u8>, ConversionError> {
        let workdir = tempfile::Builder::new()
            .prefix("photoframe-convert-")
            .tempdir()?;
        let input = workdir.path().join(format!("source.{}", format.extension()));
        let output = workdir.path().join("converted.png");

        let mut file = std::fs::File::create(&input)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        let args = command::expand_args(
            &self.args,
            &[("input", input.as_path()), ("output", output.as_path())],
        );
        debug!(program = %self.program, ?args, "running converter");

        command::run_with_timeout(&self.program, &args, self.timeout).map_err(|e| match e {
            CommandError::NotFound(_) => ConversionError::Unavailable(format.mime_type()),
            CommandError::TimedOut { timeout, .. } => ConversionError::TimedOut(timeout),
            CommandError::Io(io) => ConversionError::Io(io),
            other => ConversionError::Failed(other.to_string()),
        })?;

        match std::fs::read(&output) {
            Ok(converted) if !converted.is_empty() => Ok(converted),
            Ok(_) => Err(ConversionError::Failed(format!(
                "{} produced an empty file",
                self.program
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConversionError::Failed(
                format!("{} produced no output", self.program),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
