//! The display capability: hand one ready image to the panel.
//!
//! The core treats the panel as an opaque `render(image) -> ok | fail`. The
//! wire protocol (SPI, GPIO, framebuffer) belongs to whatever driver program
//! [`CommandDisplay`] runs; the vendor's e-paper script and `fbi` both work.
//! [`MirrorDisplay`] writes the frame to a file instead, for previews and for
//! setups where another process watches that file.

use crate::command::{self, CommandError};
use crate::imaging::NormalizeError;
use crate::store::write_atomic;
use crate::types::ReadyImage;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display driver timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),
    #[error("display driver failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("image could not be prepared: {0}")]
    Image(#[from] NormalizeError),
}

/// Something that can show a frame.
pub trait Display: Sync {
    fn render(&self, image: &ReadyImage) -> Result<(), DisplayError>;
}

/// Runs a driver program with `{image}` replaced by the path of a temp copy
/// of the frame.
#[derive(Debug, Clone)]
pub struct CommandDisplay {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Display for CommandDisplay {
    fn render(&self, image: &ReadyImage) -> Result<(), DisplayError> {
        let mut frame = tempfile::Builder::new()
            .prefix("photoframe-render-")
            .suffix(".bmp")
            .tempfile()?;
        frame.write_all(&image.bytes)?;
        frame.as_file().sync_all()?;

        let args = command::expand_args(&self.args, &[("image", frame.path())]);
        debug!(program = %self.program, ?args, id = %image.id, "running display driver");

        command::run_with_timeout(&self.program, &args, self.timeout).map_err(|e| match e {
            CommandError::TimedOut { timeout, .. } => DisplayError::TimedOut(timeout),
            CommandError::Io(io) => DisplayError::Io(io),
            other => DisplayError::Failed(other.to_string()),
        })
    }
}

/// Atomically copies the frame to a fixed path, e.g. `current.bmp`.
#[derive(Debug, Clone)]
pub struct MirrorDisplay {
    pub path: PathBuf,
}

impl Display for MirrorDisplay {
    fn render(&self, image: &ReadyImage) -> Result<(), DisplayError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, &image.bytes)?;
        debug!(id = %image.id, path = %self.path.display(), "mirrored frame");
        Ok(())
    }
}
