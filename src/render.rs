//! The Render Job: one scheduled invocation of "show the current image".
//!
//! ```text
//! lock ─ current() ─ prepare ─ display.render ─┬─ ok   → advance_from(shown)
//!   │        │                                 └─ fail → keep cursor
//!   │        └─ none → NothingToShow
//!   └─ held elsewhere → Busy
//! ```
//!
//! The job never advances past an image it failed to show, so a flaky panel
//! retries the same image on the next tick instead of silently skipping it.
//! Advancing moves past the image that was shown, not whatever the cursor
//! says by then: a `set-current` made while the panel refreshes is kept.
//!
//! # Locking
//!
//! A run holds an exclusive OS lock on `state/render.lock` for its lifetime
//! ([`File::try_lock`]). A second run started while the first is still
//! refreshing the panel finds the lock held and exits as [`RunOutcome::Busy`].
//! The lock belongs to the open file, so a killed run releases it with its
//! process; there is no stale lock to clean up.

use crate::display::{Display, DisplayError};
use crate::imaging::{FrameSpec, fit_for_panel};
use crate::rotation::{RotationError, RotationTracker};
use crate::types::{ImageId, ReadyImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the lock file within the state directory.
pub const LOCK_FILENAME: &str = "render.lock";
/// Name of the render history within the state directory.
pub const HISTORY_FILENAME: &str = "render-history.jsonl";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("rotation error: {0}")]
    Rotation(#[from] RotationError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a run ended. Failures of the panel are outcomes, not errors: the job
/// itself worked and recorded what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Rendered { id: ImageId, next: Option<ImageId> },
    NothingToShow,
    Busy,
    DisplayFailed { id: ImageId, error: String },
}

impl RunOutcome {
    /// Process exit status for the scheduler.
    ///
    /// `0` covers both a render and the no-ops (empty set, another run holding
    /// the lock): neither needs the scheduler's attention, and stdout and the
    /// history say which one happened. `2` is a display failure. Internal
    /// errors exit `1` from `main`.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::DisplayFailed { .. } => 2,
            _ => 0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RunOutcome::Rendered { .. } => "rendered",
            RunOutcome::NothingToShow => "nothing-to-show",
            RunOutcome::Busy => "busy",
            RunOutcome::DisplayFailed { .. } => "display-failed",
        }
    }
}

/// One line of `render-history.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRecord {
    pub at: DateTime<Utc>,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ImageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderRecord {
    pub fn new(outcome: &RunOutcome, at: DateTime<Utc>) -> Self {
        let (id, error) = match outcome {
            RunOutcome::Rendered { id, .. } => (Some(id.clone()), None),
            RunOutcome::DisplayFailed { id, error } => (Some(id.clone()), Some(error.clone())),
            RunOutcome::NothingToShow | RunOutcome::Busy => (None, None),
        };
        Self {
            at,
            outcome: outcome.label().to_string(),
            id,
            error,
        }
    }
}

/// Exclusive hold on the render lock file. Released on drop.
#[derive(Debug)]
pub struct JobLock {
    _file: File,
}

impl JobLock {
    /// Take the lock, or `None` if another holder has it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        match file.try_lock() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }
}

pub struct RenderJob<'a> {
    tracker: &'a RotationTracker,
    display: &'a dyn Display,
    frame: FrameSpec,
    lock_path: PathBuf,
    history: Option<PathBuf>,
}

impl<'a> RenderJob<'a> {
    pub fn new(
        tracker: &'a RotationTracker,
        display: &'a dyn Display,
        frame: FrameSpec,
        state_dir: &Path,
    ) -> Self {
        Self {
            tracker,
            display,
            frame,
            lock_path: state_dir.join(LOCK_FILENAME),
            history: None,
        }
    }

    /// Append a [`RenderRecord`] per run to `path`.
    pub fn with_history(mut self, path: PathBuf) -> Self {
        self.history = Some(path);
        self
    }

    pub fn run(&self) -> Result<RunOutcome, RenderError> {
        let Some(_lock) = JobLock::try_acquire(&self.lock_path)? else {
            info!("another render is in progress, skipping");
            return Ok(RunOutcome::Busy);
        };

        let outcome = self.run_locked()?;
        self.record(&outcome);
        Ok(outcome)
    }

    fn run_locked(&self) -> Result<RunOutcome, RenderError> {
        let Some(image) = self.tracker.current()? else {
            info!("no ready images, nothing to show");
            return Ok(RunOutcome::NothingToShow);
        };
        let id = image.id.clone();

        let shown = self
            .prepare(image)
            .and_then(|frame| self.display.render(&frame));
        if let Err(e) = shown {
            warn!(%id, error = %e, "render failed, rotation not advanced");
            return Ok(RunOutcome::DisplayFailed {
                id,
                error: e.to_string(),
            });
        }

        let next = self.tracker.advance_from(&id)?;
        info!(%id, next = ?next.as_ref().map(ImageId::as_str), "rendered");
        Ok(RunOutcome::Rendered { id, next })
    }

    /// Re-fit a stored frame whose size no longer matches the panel.
    fn prepare(&self, image: ReadyImage) -> Result<ReadyImage, DisplayError> {
        match fit_for_panel(&image.bytes, &self.frame)? {
            None => Ok(image),
            Some(bytes) => {
                warn!(id = %image.id, "stored image does not match the panel size, refitting");
                Ok(ReadyImage { bytes, ..image })
            }
        }
    }

    fn record(&self, outcome: &RunOutcome) {
        let Some(path) = &self.history else {
            return;
        };
        let record = RenderRecord::new(outcome, Utc::now());
        if let Err(e) = append_record(path, &record) {
            warn!(path = %path.display(), error = %e, "could not append render history");
        }
    }
}

fn append_record(path: &Path, record: &RenderRecord) -> Result<(), RenderError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}

/// The most recent readable record in a history file, if any.
pub fn last_record(path: &Path) -> Result<Option<RenderRecord>, RenderError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(content.lines().rev().find_map(|line| {
        serde_json::from_str(line)
            .inspect_err(|e| debug!(error = %e, "skipping unreadable history line"))
            .ok()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::tests::MockDisplay;
    use crate::imaging::Palette;
    use crate::test_helpers::{frame_bmp, id, temp_store};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn small_panel() -> FrameSpec {
        FrameSpec {
            width: 80,
            height: 48,
            palette: Palette::FullColor,
            ..FrameSpec::default()
        }
    }

    fn setup(names: &[&str]) -> (TempDir, RotationTracker) {
        let (tmp, store) = temp_store();
        for name in names {
            store.publish(&id(name), &frame_bmp(80, 48), b"t").unwrap();
        }
        let tracker = RotationTracker::new(store, &tmp.path().join("state")).unwrap();
        (tmp, tracker)
    }

    fn job<'a>(tmp: &TempDir, tracker: &'a RotationTracker, display: &'a MockDisplay) -> RenderJob<'a> {
        RenderJob::new(tracker, display, small_panel(), &tmp.path().join("state"))
    }

    #[test]
    fn renders_current_then_advances() {
        let (tmp, tracker) = setup(&["a", "b"]);
        let display = MockDisplay::new();
        let outcome = job(&tmp, &tracker, &display).run().unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Rendered {
                id: id("a"),
                next: Some(id("b"))
            }
        );
        assert_eq!(display.rendered_ids(), vec!["a"]);
        assert_eq!(tracker.current().unwrap().unwrap().id, id("b"));
    }

    #[test]
    fn empty_set_is_a_no_op() {
        let (tmp, tracker) = setup(&[]);
        let display = MockDisplay::new();
        let outcome = job(&tmp, &tracker, &display).run().unwrap();
        assert_eq!(outcome, RunOutcome::NothingToShow);
        assert_eq!(outcome.exit_code(), 0);
        assert!(display.rendered_ids().is_empty());
    }

    #[test]
    fn display_failure_does_not_advance() {
        let (tmp, tracker) = setup(&["a", "b"]);
        let display = MockDisplay::failing_on(&[id("a")]);
        let outcome = job(&tmp, &tracker, &display).run().unwrap();
        assert!(matches!(&outcome, RunOutcome::DisplayFailed { id: failed, .. } if failed.as_str() == "a"));
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(tracker.current().unwrap().unwrap().id, id("a"));
    }

    /// Panel whose refresh is slow enough for the gallery to pick another
    /// image while it runs.
    struct SelectingDisplay<'a> {
        tracker: &'a RotationTracker,
        select: ImageId,
        shown: Mutex<Vec<String>>,
    }

    impl Display for SelectingDisplay<'_> {
        fn render(&self, image: &ReadyImage) -> Result<(), DisplayError> {
            self.shown.lock().unwrap().push(image.id.to_string());
            self.tracker.set_current(&self.select).unwrap();
            Ok(())
        }
    }

    #[test]
    fn selection_made_during_render_is_kept() {
        let (tmp, tracker) = setup(&["a", "b", "c"]);
        let display = SelectingDisplay {
            tracker: &tracker,
            select: id("c"),
            shown: Mutex::new(Vec::new()),
        };
        let job = RenderJob::new(&tracker, &display, small_panel(), &tmp.path().join("state"));

        assert_eq!(
            job.run().unwrap(),
            RunOutcome::Rendered {
                id: id("a"),
                next: Some(id("c"))
            }
        );
        // The selection now matches what is shown, so the run moves on.
        assert_eq!(
            job.run().unwrap(),
            RunOutcome::Rendered {
                id: id("c"),
                next: Some(id("a"))
            }
        );
        assert_eq!(*display.shown.lock().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn no_op_outcomes_exit_zero() {
        assert_eq!(RunOutcome::NothingToShow.exit_code(), 0);
        assert_eq!(RunOutcome::Busy.exit_code(), 0);
        let rendered = RunOutcome::Rendered {
            id: id("a"),
            next: None,
        };
        assert_eq!(rendered.exit_code(), 0);
        let failed = RunOutcome::DisplayFailed {
            id: id("a"),
            error: "x".into(),
        };
        assert_eq!(failed.exit_code(), 2);
    }

    #[test]
    fn held_lock_means_busy() {
        let (tmp, tracker) = setup(&["a"]);
        let display = MockDisplay::new();
        let held = JobLock::try_acquire(&tmp.path().join("state").join(LOCK_FILENAME))
            .unwrap()
            .unwrap();

        let outcome = job(&tmp, &tracker, &display).run().unwrap();
        assert_eq!(outcome, RunOutcome::Busy);
        assert_eq!(outcome.exit_code(), 0);
        assert!(display.rendered_ids().is_empty());

        drop(held);
        assert!(matches!(
            job(&tmp, &tracker, &display).run().unwrap(),
            RunOutcome::Rendered { .. }
        ));
    }

    #[test]
    fn lock_is_released_after_run() {
        let (tmp, tracker) = setup(&["a"]);
        let display = MockDisplay::new();
        job(&tmp, &tracker, &display).run().unwrap();
        let lock = JobLock::try_acquire(&tmp.path().join("state").join(LOCK_FILENAME)).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn mismatched_frame_is_refitted() {
        let (tmp, store) = temp_store();
        store.publish(&id("a"), &frame_bmp(800, 480), b"t").unwrap();
        let tracker = RotationTracker::new(store, &tmp.path().join("state")).unwrap();
        let display = MockDisplay::new();

        job(&tmp, &tracker, &display).run().unwrap();
        let shown = display.rendered.lock().unwrap()[0].clone();
        let img = image::load_from_memory(&shown.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (80, 48));
    }

    #[test]
    fn unreadable_frame_is_a_display_failure() {
        let (tmp, store) = temp_store();
        store.publish(&id("a"), b"not a bitmap", b"t").unwrap();
        let tracker = RotationTracker::new(store, &tmp.path().join("state")).unwrap();
        let display = MockDisplay::new();

        let outcome = job(&tmp, &tracker, &display).run().unwrap();
        assert!(matches!(outcome, RunOutcome::DisplayFailed { .. }));
        assert!(display.rendered_ids().is_empty());
    }

    #[test]
    fn history_records_each_run() {
        let (tmp, tracker) = setup(&["a"]);
        let history = tmp.path().join("state").join(HISTORY_FILENAME);
        let display = MockDisplay::failing_on(&[id("a")]);

        let job = job(&tmp, &tracker, &display).with_history(history.clone());
        job.run().unwrap();
        display.recover(&id("a"));
        job.run().unwrap();

        let lines: Vec<RenderRecord> = std::fs::read_to_string(&history)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].outcome, "display-failed");
        assert!(lines[0].error.as_deref().unwrap().contains("panel rejected a"));
        assert_eq!(lines[1].outcome, "rendered");
        assert_eq!(lines[1].id, Some(id("a")));

        assert_eq!(last_record(&history).unwrap().unwrap().outcome, "rendered");
    }

    #[test]
    fn last_record_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(HISTORY_FILENAME);
        assert!(last_record(&path).unwrap().is_none());

        let good = RenderRecord::new(&RunOutcome::NothingToShow, Utc::now());
        std::fs::write(
            &path,
            format!("{}\n{{truncated", serde_json::to_string(&good).unwrap()),
        )
        .unwrap();
        assert_eq!(last_record(&path).unwrap(), Some(good));
    }
}
