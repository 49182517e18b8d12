//! The Rotation Tracker: which ready image is "current".
//!
//! The rotation order is simply [`ReadySet::list`] order. The only durable
//! state is a small record in `state/rotation.json`:
//!
//! ```json
//! { "version": 1, "cursor": "20250118-093012-IMG_4411-3fa9c2d0",
//!   "generation": 7, "membership": "9f2c…" }
//! ```
//!
//! # States
//!
//! ```text
//!            publish                 delete last
//!   EMPTY ─────────────▶ POSITIONED ─────────────▶ EMPTY
//!                          │    ▲
//!          cursor vanished │    │ next existing id
//!                          ▼    │
//!                        REPAIRING   (resolved within the same call)
//! ```
//!
//! A vanished cursor is repaired to its successor: the first id ordered
//! after it, wrapping to the first id. That is also where `advance` would
//! have gone next, so deleting the shown image does not skip anything.
//!
//! # Persistence
//!
//! The record is replaced atomically (temp file + rename), so a crash leaves
//! the previous record. A missing, unreadable or unparseable record is the
//! empty state: the next call positions on the first image.
//!
//! # Generation
//!
//! `membership` is a SHA-256 digest of the ordered id list. Whenever a load
//! observes a different digest, `generation` is bumped. The counter lets
//! callers notice that uploads or deletions happened between two renders.

use crate::store::{ReadySet, StoreError, write_atomic};
use crate::types::{ImageId, ReadyImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the rotation record within the state directory.
const RECORD_FILENAME: &str = "rotation.json";

/// Version of the record format. Records with another version are ignored.
const RECORD_VERSION: u32 = 1;

/// How often `current` re-lists when its target is deleted underneath it.
const MAX_REPAIR_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("image not in rotation: {0}")]
    NotFound(ImageId),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk rotation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RotationRecord {
    version: u32,
    cursor: Option<ImageId>,
    generation: u64,
    membership: String,
}

impl RotationRecord {
    fn empty() -> Self {
        Self {
            version: RECORD_VERSION,
            cursor: None,
            generation: 0,
            membership: membership_digest(&[]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No ready images.
    Empty,
    /// Cursor points at an existing image.
    Positioned,
    /// Cursor is unset or points at a deleted image; the next `current` or
    /// `advance` resolves it.
    Repairing,
}

/// Read-only view of the rotation, for `photoframe status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationStatus {
    pub phase: Phase,
    pub cursor: Option<ImageId>,
    /// Zero-based index of the cursor in rotation order.
    pub position: Option<usize>,
    pub total: usize,
    pub generation: u64,
}

/// A loaded record reconciled against the current store membership.
struct Snapshot {
    record: RotationRecord,
    ids: Vec<ImageId>,
    dirty: bool,
}

pub struct RotationTracker {
    store: ReadySet,
    record_path: PathBuf,
}

impl RotationTracker {
    pub fn new(store: ReadySet, state_dir: &Path) -> Result<Self, RotationError> {
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            store,
            record_path: state_dir.join(RECORD_FILENAME),
        })
    }

    pub fn store(&self) -> &ReadySet {
        &self.store
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// The image at the cursor, repairing a dangling cursor first.
    ///
    /// Returns `None` only when the ready set is empty.
    pub fn current(&self) -> Result<Option<ReadyImage>, RotationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut snap = self.snapshot()?;
            let target = resolve(snap.record.cursor.as_ref(), &snap.ids);

            if target != snap.record.cursor {
                if let Some(old) = &snap.record.cursor {
                    info!(from = %old, to = ?target.as_ref().map(ImageId::as_str), "repaired cursor");
                }
                snap.record.cursor = target.clone();
                snap.dirty = true;
            }
            if snap.dirty {
                self.save(&snap.record)?;
            }

            let Some(id) = target else {
                return Ok(None);
            };
            match self.store.get(&id) {
                Ok(image) => return Ok(Some(image)),
                // Deleted between listing and reading: list again
                Err(StoreError::NotFound(id)) if attempt < MAX_REPAIR_ATTEMPTS => {
                    debug!(%id, "current image vanished while reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move the cursor to the next image, wrapping at the end.
    ///
    /// With no cursor, positions on the first image. With a vanished cursor,
    /// moves to its successor. A no-op on an empty set.
    pub fn advance(&self) -> Result<Option<ImageId>, RotationError> {
        let mut snap = self.snapshot()?;
        let next = successor(snap.record.cursor.as_ref(), &snap.ids);

        if next != snap.record.cursor || snap.dirty {
            snap.record.cursor = next.clone();
            self.save(&snap.record)?;
        }
        match &next {
            Some(id) => info!(%id, generation = snap.record.generation, "advanced"),
            None => debug!("advance on empty rotation"),
        }
        Ok(next)
    }

    /// Move past `shown`, but only if the cursor still points at it.
    ///
    /// A render reads the cursor, spends seconds on the panel, then advances.
    /// If the cursor was moved in between (`set_current`, `advance`), that
    /// choice stands and is returned as the next image instead.
    pub fn advance_from(&self, shown: &ImageId) -> Result<Option<ImageId>, RotationError> {
        let mut snap = self.snapshot()?;

        if snap.record.cursor.as_ref() != Some(shown) {
            let kept = resolve(snap.record.cursor.as_ref(), &snap.ids);
            info!(
                %shown,
                cursor = ?snap.record.cursor.as_ref().map(ImageId::as_str),
                "cursor moved during render, keeping it"
            );
            if snap.dirty {
                self.save(&snap.record)?;
            }
            return Ok(kept);
        }

        let next = successor(Some(shown), &snap.ids);
        snap.record.cursor = next.clone();
        self.save(&snap.record)?;
        match &next {
            Some(id) => info!(%id, generation = snap.record.generation, "advanced"),
            None => debug!("advance on empty rotation"),
        }
        Ok(next)
    }

    /// Point the cursor at `id`, which must be published.
    pub fn set_current(&self, id: &ImageId) -> Result<(), RotationError> {
        let mut snap = self.snapshot()?;
        if snap.ids.binary_search(id).is_err() {
            return Err(RotationError::NotFound(id.clone()));
        }
        snap.record.cursor = Some(id.clone());
        self.save(&snap.record)?;
        info!(%id, "cursor set");
        Ok(())
    }

    /// Snapshot of the rotation. Never writes the record.
    pub fn status(&self) -> Result<RotationStatus, RotationError> {
        let snap = self.snapshot()?;
        let position = snap
            .record
            .cursor
            .as_ref()
            .and_then(|c| snap.ids.binary_search(c).ok());
        let phase = if snap.ids.is_empty() {
            Phase::Empty
        } else if position.is_some() {
            Phase::Positioned
        } else {
            Phase::Repairing
        };
        Ok(RotationStatus {
            phase,
            cursor: snap.record.cursor,
            position,
            total: snap.ids.len(),
            generation: snap.record.generation,
        })
    }

    fn snapshot(&self) -> Result<Snapshot, RotationError> {
        let ids = self.store.ids()?;
        let mut record = self.load();
        let digest = membership_digest(&ids);
        let dirty = record.membership != digest;
        if dirty {
            record.generation += 1;
            record.membership = digest;
            debug!(generation = record.generation, total = ids.len(), "membership changed");
        }
        Ok(Snapshot { record, ids, dirty })
    }

    /// Load the record. Anything unusable is treated as the empty state.
    fn load(&self) -> RotationRecord {
        let content = match std::fs::read_to_string(&self.record_path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return RotationRecord::empty(),
            Err(e) => {
                warn!(path = %self.record_path.display(), error = %e, "unreadable rotation record, starting over");
                return RotationRecord::empty();
            }
        };
        match serde_json::from_str::<RotationRecord>(&content) {
            Ok(record) if record.version == RECORD_VERSION => record,
            Ok(record) => {
                warn!(version = record.version, "unknown rotation record version, starting over");
                RotationRecord::empty()
            }
            Err(e) => {
                warn!(path = %self.record_path.display(), error = %e, "corrupt rotation record, starting over");
                RotationRecord::empty()
            }
        }
    }

    fn save(&self, record: &RotationRecord) -> Result<(), RotationError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path, &json)?;
        Ok(())
    }
}

/// Where the cursor should be: itself if present, else its successor.
fn resolve(cursor: Option<&ImageId>, ids: &[ImageId]) -> Option<ImageId> {
    match cursor {
        Some(c) if ids.binary_search(c).is_ok() => Some(c.clone()),
        _ => successor(cursor, ids),
    }
}

/// The id after `cursor` in rotation order, wrapping. For a cursor that is
/// not in `ids`, the first id ordered after it.
fn successor(cursor: Option<&ImageId>, ids: &[ImageId]) -> Option<ImageId> {
    if ids.is_empty() {
        return None;
    }
    let idx = match cursor.map(|c| ids.binary_search(c)) {
        None => 0,
        Some(Ok(i)) => i + 1,
        Some(Err(i)) => i,
    };
    Some(ids[idx % ids.len()].clone())
}

/// SHA-256 of the ordered id list, as a hex string.
fn membership_digest(ids: &[ImageId]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"membership\0");
    for id in ids {
        hasher.update(id.as_str().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
