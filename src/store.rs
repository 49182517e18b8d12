//! The Ready-Set Store: display-ready images and their thumbnails on disk.
//!
//! ```text
//! photos_ready/20250118-093012-IMG_4411-3fa9c2d0.bmp
//! thumbs/20250118-093012-IMG_4411-3fa9c2d0.jpg
//! ```
//!
//! # Atomic publish
//!
//! Both files are written under hidden temp names (`.incoming-*.partial`) in
//! their final directories, fsynced, then renamed into place: thumbnail
//! first, image last. The image file is the visibility marker; an id is
//! listed only once its `.bmp` exists, and by then the thumbnail does too.
//! Readers in other processes never see a half-written file because rename
//! within a directory is atomic.
//!
//! A crash between the two renames leaves an orphan thumbnail, and a crash
//! mid-write leaves a temp file. Neither is ever listed; [`ReadySet::sweep`]
//! removes them.
//!
//! # Ordering
//!
//! [`ReadySet::list`] yields ids in file-name order, compared without the
//! extension so that list order and [`ImageId`] order agree. Ids start with
//! the upload timestamp, so this is upload order, and it is identical across
//! runs.

use crate::types::{ImageId, ReadyImage};
use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const IMAGE_EXT: &str = "bmp";
const THUMB_EXT: &str = "jpg";
const TEMP_PREFIX: &str = ".incoming-";
const TEMP_SUFFIX: &str = ".partial";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("image not found: {0}")]
    NotFound(ImageId),
    #[error("image already exists: {0}")]
    AlreadyExists(ImageId),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What [`ReadySet::sweep`] removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub temp_files: usize,
    pub orphan_thumbnails: usize,
}

/// Handle on the ready and thumbnail directories.
///
/// Cheap to construct; holds no open files. Any number of handles, in any
/// number of processes, may operate on the same directories.
#[derive(Debug, Clone)]
pub struct ReadySet {
    images: PathBuf,
    thumbs: PathBuf,
}

impl ReadySet {
    /// Open the store, creating both directories if needed.
    pub fn open(images: impl Into<PathBuf>, thumbs: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            images: images.into(),
            thumbs: thumbs.into(),
        };
        std::fs::create_dir_all(&store.images)?;
        std::fs::create_dir_all(&store.thumbs)?;
        Ok(store)
    }

    pub fn images_dir(&self) -> &Path {
        &self.images
    }

    pub fn thumbs_dir(&self) -> &Path {
        &self.thumbs
    }

    pub fn image_path(&self, id: &ImageId) -> PathBuf {
        self.images.join(format!("{id}.{IMAGE_EXT}"))
    }

    pub fn thumbnail_path(&self, id: &ImageId) -> PathBuf {
        self.thumbs.join(format!("{id}.{THUMB_EXT}"))
    }

    /// Atomically publish an image and its thumbnail under `id`.
    pub fn publish(
        &self,
        id: &ImageId,
        image: &[u8],
        thumbnail: &[u8],
    ) -> Result<ReadyImage, StoreError> {
        let image_path = self.image_path(id);
        if image_path.exists() {
            return Err(StoreError::AlreadyExists(id.clone()));
        }

        let thumb_tmp = write_temp(&self.thumbs, thumbnail)?;
        let image_tmp = write_temp(&self.images, image)?;

        thumb_tmp
            .persist(self.thumbnail_path(id))
            .map_err(|e| e.error)?;
        if let Err(e) = image_tmp.persist_noclobber(&image_path) {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                // Lost a race with an identical upload; its thumbnail is ours.
                return Err(StoreError::AlreadyExists(id.clone()));
            }
            return Err(e.error.into());
        }
        sync_dir(&self.images);

        info!(%id, bytes = image.len(), "published");
        Ok(ReadyImage {
            id: id.clone(),
            path: image_path,
            bytes: image.to_vec(),
        })
    }

    /// Lazily enumerate published ids in file-name order.
    ///
    /// Each call starts a fresh walk, so a sequence can be restarted by
    /// calling `list` again.
    pub fn list(&self) -> ReadyIds {
        ReadyIds {
            inner: WalkDir::new(&self.images)
                .min_depth(1)
                .max_depth(1)
                .sort_by(|a, b| a.path().file_stem().cmp(&b.path().file_stem()))
                .into_iter(),
        }
    }

    /// All published ids, in order.
    pub fn ids(&self) -> Result<Vec<ImageId>, StoreError> {
        self.list().collect()
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.image_path(id).is_file()
    }

    /// Read a published image.
    pub fn get(&self, id: &ImageId) -> Result<ReadyImage, StoreError> {
        let path = self.image_path(id);
        let bytes = read_existing(&path, id)?;
        Ok(ReadyImage {
            id: id.clone(),
            path,
            bytes,
        })
    }

    /// Read the thumbnail of a published image.
    pub fn thumbnail(&self, id: &ImageId) -> Result<Vec<u8>, StoreError> {
        if !self.contains(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        read_existing(&self.thumbnail_path(id), id)
    }

    /// Remove an image and its thumbnail.
    ///
    /// The image goes first, so the id disappears from [`list`](Self::list)
    /// before its thumbnail does.
    pub fn delete(&self, id: &ImageId) -> Result<(), StoreError> {
        match std::fs::remove_file(self.image_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        match std::fs::remove_file(self.thumbnail_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(%id, "deleted image had no thumbnail");
            }
            Err(e) => return Err(e.into()),
        }
        info!(%id, "deleted");
        Ok(())
    }

    /// Remove leftovers of interrupted publishes that are older than `grace`.
    ///
    /// The grace period keeps a sweep from racing a publish that is still in
    /// flight in another process.
    pub fn sweep(&self, grace: Duration) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        for dir in [&self.images, &self.thumbs] {
            for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
                let entry = entry.map_err(io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                let is_temp = name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX);
                let is_orphan = dir == &self.thumbs
                    && !is_temp
                    && id_from_file_name(entry.file_name(), THUMB_EXT)
                        .is_some_and(|id| !self.contains(&id));
                if !(is_temp || is_orphan) || !older_than(entry.path(), now, grace) {
                    continue;
                }

                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
                debug!(path = %entry.path().display(), "swept");
                if is_temp {
                    report.temp_files += 1;
                } else {
                    report.orphan_thumbnails += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                temp_files = report.temp_files,
                orphan_thumbnails = report.orphan_thumbnails,
                "swept store"
            );
        }
        Ok(report)
    }
}

/// Iterator returned by [`ReadySet::list`].
pub struct ReadyIds {
    inner: walkdir::IntoIter,
}

impl Iterator for ReadyIds {
    type Item = Result<ImageId, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(io::Error::from(e).into())),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(id) = id_from_file_name(entry.file_name(), IMAGE_EXT) {
                return Some(Ok(id));
            }
        }
    }
}

/// `<id>.<ext>` → id. Hidden files, temp files and other extensions → `None`.
fn id_from_file_name(name: &OsStr, ext: &str) -> Option<ImageId> {
    let stem = name.to_str()?.strip_suffix(ext)?.strip_suffix('.')?;
    ImageId::parse(stem).ok()
}

/// Write `bytes` to a hidden temp file in `dir` and fsync it.
fn write_temp(dir: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Replace `path` with `bytes` via temp file and rename in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    write_temp(dir, bytes)?.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

/// Flush directory entries so a rename survives power loss.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
    #[cfg(not(unix))]
    let _ = dir;
}

fn read_existing(path: &Path, id: &ImageId) -> Result<Vec<u8>, StoreError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(id.clone()),
        _ => StoreError::Io(e),
    })
}

fn older_than(path: &Path, now: SystemTime, grace: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| now.duration_since(modified).unwrap_or_default() >= grace)
        .unwrap_or(false)
}
