//! Bounded execution of external helper programs.
//!
//! Both external capabilities, the HEIC converter and the panel driver, are
//! opaque programs that may hang on bad input or stuck hardware. They run
//! through [`run_with_timeout`], which polls the child and kills it once the
//! deadline passes, so a wedged helper fails one upload or one render instead
//! of stalling the caller.
//!
//! Argument templates use `{name}` placeholders (`{input}`, `{output}`,
//! `{image}`), expanded by [`expand_args`].

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Trailing stderr kept for error messages.
const STDERR_TAIL: usize = 2048;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("program not found: {0}")]
    NotFound(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {}s", .timeout.as_secs_f32())]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replace `{key}` placeholders in each argument with the matching path.
pub fn expand_args(template: &[String], vars: &[(&str, &Path)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), &value.to_string_lossy())
            })
        })
        .collect()
}

/// Run `program args…` to completion, killing it after `timeout`.
///
/// Stdout is discarded; stderr goes to an anonymous temp file (not a pipe, so
/// a chatty child cannot block on a full buffer while we poll) and its tail
/// is reported on failure.
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<(), CommandError> {
    let mut stderr_file = tempfile::tempfile()?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr_file.try_clone()?))
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::NotFound(program.to_string())
            } else {
                CommandError::Spawn {
                    program: program.to_string(),
                    source: e,
                }
            }
        })?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            // The child may exit on its own between try_wait and kill.
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::TimedOut {
                program: program.to_string(),
                timeout,
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    if status.success() {
        return Ok(());
    }

    Err(CommandError::Failed {
        program: program.to_string(),
        status,
        stderr: read_tail(&mut stderr_file)?,
    })
}

fn read_tail(file: &mut std::fs::File) -> std::io::Result<String> {
    let len = file.seek(SeekFrom::End(0))?;
    let start = len.saturating_sub(STDERR_TAIL as u64);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}
