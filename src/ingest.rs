//! The Ingestion Gateway's entry point into the core.
//!
//! An upload goes through three steps:
//!
//! 1. The raw bytes are kept as a source asset in the intake directory
//!    (`photos_src/<id>.<ext>`), written atomically.
//! 2. The [`Normalizer`] turns them into a panel frame and a thumbnail.
//! 3. The [`ReadySet`] publishes both.
//!
//! The source asset is removed when the upload finishes, whether it was
//! published or rejected; a rejection is logged with its reason first.
//! Failures go back to the caller unchanged so the uploader sees them; they
//! are never retried here.

use crate::imaging::{Converter, NormalizeError, Normalizer, detect_format};
use crate::naming::{generate_id, parse_image_id};
use crate::store::{ReadySet, StoreError};
use crate::types::{ImageId, ReadyImage};
use chrono::{NaiveDateTime, TimeDelta, Utc};
use rayon::prelude::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Normalize(#[from] NormalizeError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Raw upload parked in the intake directory. Removed on drop.
struct SourceAsset {
    id: ImageId,
    path: PathBuf,
}

impl SourceAsset {
    fn write(intake: &Path, id: &ImageId, bytes: &[u8]) -> io::Result<Self> {
        let ext = detect_format(bytes).map(|f| f.extension()).unwrap_or("bin");
        let path = intake.join(format!("{id}.{ext}"));
        let mut tmp = tempfile::Builder::new()
            .prefix(".incoming-")
            .suffix(".partial")
            .tempfile_in(intake)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(Self {
            id: id.clone(),
            path,
        })
    }
}

impl Drop for SourceAsset {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(id = %self.id, "removed source asset"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(id = %self.id, path = %self.path.display(), error = %e, "could not remove source asset"),
        }
    }
}

/// Accepts uploads and turns them into ready images.
pub struct Ingestor<C> {
    normalizer: Normalizer<C>,
    store: ReadySet,
    intake: PathBuf,
}

impl<C: Converter> Ingestor<C> {
    pub fn new(normalizer: Normalizer<C>, store: ReadySet, intake: impl Into<PathBuf>) -> io::Result<Self> {
        let intake = intake.into();
        std::fs::create_dir_all(&intake)?;
        Ok(Self {
            normalizer,
            store,
            intake,
        })
    }

    pub fn store(&self) -> &ReadySet {
        &self.store
    }

    pub fn intake_dir(&self) -> &Path {
        &self.intake
    }

    /// Ingest one upload received now. `name` is the uploader's file name,
    /// `declared` the MIME type it claimed.
    ///
    /// Ids are stamped in UTC so a DST change cannot reorder uploads.
    pub fn ingest(
        &self,
        name: &str,
        declared: Option<&str>,
        bytes: &[u8],
    ) -> Result<ReadyImage, IngestError> {
        self.ingest_at(Utc::now().naive_utc(), name, declared, bytes)
    }

    /// Ingest one upload with an explicit receive time (UTC).
    ///
    /// A time earlier than the newest published id, e.g. after the clock was
    /// set back, is moved one second past it: new uploads always join the end
    /// of the rotation.
    pub fn ingest_at(
        &self,
        received: NaiveDateTime,
        name: &str,
        declared: Option<&str>,
        bytes: &[u8],
    ) -> Result<ReadyImage, IngestError> {
        self.normalizer.check_size(bytes.len() as u64)?;

        let id = generate_id(self.arrival_time(received)?, name, bytes);
        let _source = SourceAsset::write(&self.intake, &id, bytes)?;

        let normalized = self.normalizer.normalize(bytes, declared).inspect_err(|e| {
            warn!(%id, name, error = %e, "upload rejected");
        })?;
        debug!(
            %id,
            format = normalized.source_format.mime_type(),
            source_width = normalized.source_dimensions.0,
            source_height = normalized.source_dimensions.1,
            "normalized"
        );

        let ready = self
            .store
            .publish(&id, &normalized.image, &normalized.thumbnail)
            .inspect_err(|e| warn!(%id, error = %e, "publish failed"))?;
        info!(%id, name, "ingested");
        Ok(ready)
    }

    fn arrival_time(&self, received: NaiveDateTime) -> Result<NaiveDateTime, StoreError> {
        let ids = self.store.ids()?;
        let newest = ids.iter().rev().find_map(|id| parse_image_id(id).uploaded_at);
        match newest {
            Some(newest) if received < newest => {
                debug!(%received, %newest, "clock is behind the newest upload");
                Ok(newest + TimeDelta::seconds(1))
            }
            _ => Ok(received),
        }
    }

    /// Ingest files from disk in parallel on the global rayon pool.
    ///
    /// Results come back in input order.
    pub fn ingest_paths(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<ReadyImage, IngestError>)> {
        paths
            .par_iter()
            .map(|path| (path.clone(), self.ingest_path(path)))
            .collect()
    }

    fn ingest_path(&self, path: &Path) -> Result<ReadyImage, IngestError> {
        self.normalizer.check_size(std::fs::metadata(path)?.len())?;
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.ingest(&name, declared_from_extension(path), &bytes)
    }

    /// Remove intake files older than `grace`, left behind by a process that
    /// died mid-upload.
    pub fn sweep_intake(&self, grace: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.intake)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .map(|m| now.duration_since(m).unwrap_or_default())
                .unwrap_or_default();
            if age < grace {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        if removed > 0 {
            info!(removed, "swept intake directory");
        }
        Ok(removed)
    }
}

/// MIME type implied by a file extension, as a browser would declare it.
pub fn declared_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "heic" | "heif" => Some("image/heic"),
        "avif" => Some("image/avif"),
        _ => image::ImageFormat::from_extension(&ext).map(|f| f.to_mime_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{DecodeLimits, FrameSpec, NoConverter, ThumbnailSpec};
    use crate::rotation::RotationTracker;
    use crate::test_helpers::{jpeg_bytes, png_bytes, temp_store};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn ingestor() -> (TempDir, Ingestor<NoConverter>) {
        let (tmp, store) = temp_store();
        let normalizer = Normalizer::new(
            FrameSpec::default(),
            ThumbnailSpec::default(),
            DecodeLimits::default(),
            NoConverter,
        );
        let ingestor = Ingestor::new(normalizer, store, tmp.path().join("photos_src")).unwrap();
        (tmp, ingestor)
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn ingest_publishes_and_clears_intake() {
        let (_tmp, ingestor) = ingestor();
        let ready = ingestor
            .ingest_at(at(9, 30, 12), "IMG_4411.JPG", Some("image/jpeg"), &jpeg_bytes(640, 480))
            .unwrap();

        assert!(ready.id.as_str().starts_with("20250118-093012-IMG_4411-"));
        assert_eq!(ingestor.store().ids().unwrap(), vec![ready.id.clone()]);
        assert!(ingestor.store().thumbnail(&ready.id).is_ok());
        assert!(dir_is_empty(ingestor.intake_dir()));
    }

    #[test]
    fn corrupt_upload_leaves_nothing_behind() {
        let (_tmp, ingestor) = ingestor();
        let err = ingestor
            .ingest_at(at(10, 0, 0), "photo.jpg", Some("image/jpeg"), b"\xFF\xD8\xFF\xE0 garbage")
            .unwrap_err();
        assert!(matches!(err, IngestError::Normalize(NormalizeError::CorruptInput(_))), "{err:?}");

        assert!(ingestor.store().ids().unwrap().is_empty());
        assert!(dir_is_empty(ingestor.store().images_dir()));
        assert!(dir_is_empty(ingestor.store().thumbs_dir()));
        assert!(dir_is_empty(ingestor.intake_dir()));
    }

    #[test]
    fn duplicate_upload_is_rejected() {
        let (_tmp, ingestor) = ingestor();
        let bytes = png_bytes(100, 60);
        ingestor.ingest_at(at(8, 0, 0), "a.png", None, &bytes).unwrap();
        let err = ingestor.ingest_at(at(8, 0, 0), "a.png", None, &bytes).unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::AlreadyExists(_))));
        assert!(dir_is_empty(ingestor.intake_dir()));
    }

    #[test]
    fn uploads_rotate_in_receive_order() {
        let (_tmp, ingestor) = ingestor();
        let first = ingestor.ingest_at(at(7, 0, 0), "z.png", None, &png_bytes(30, 40)).unwrap();
        let second = ingestor.ingest_at(at(12, 0, 0), "a.png", None, &png_bytes(40, 30)).unwrap();
        assert_eq!(ingestor.store().ids().unwrap(), vec![first.id, second.id]);
    }

    #[test]
    fn upload_after_clock_set_back_is_appended() {
        let (_tmp, ingestor) = ingestor();
        let before = ingestor.ingest_at(at(12, 0, 0), "z.png", None, &png_bytes(40, 30)).unwrap();
        let after = ingestor.ingest_at(at(7, 0, 0), "a.png", None, &png_bytes(30, 40)).unwrap();

        assert_eq!(ingestor.store().ids().unwrap(), vec![before.id, after.id.clone()]);
        assert_eq!(parse_image_id(&after.id).uploaded_at, Some(at(12, 0, 1)));
    }

    #[test]
    fn upload_during_repeated_hour_joins_after_cursor() {
        let (tmp, ingestor) = ingestor();
        let tracker = RotationTracker::new(ingestor.store().clone(), &tmp.path().join("state")).unwrap();

        ingestor.ingest_at(at(0, 30, 0), "zero.png", None, &png_bytes(30, 20)).unwrap();
        let shown = ingestor.ingest_at(at(1, 50, 0), "first.png", None, &png_bytes(31, 20)).unwrap();
        tracker.set_current(&shown.id).unwrap();

        // Wall clock fell back an hour: 01:10 the second time round.
        let later = ingestor.ingest_at(at(1, 10, 0), "second.png", None, &png_bytes(32, 20)).unwrap();

        assert_eq!(tracker.status().unwrap().cursor, Some(shown.id));
        assert_eq!(tracker.advance().unwrap(), Some(later.id));
    }

    #[test]
    fn ingest_stamps_utc() {
        let (_tmp, ingestor) = ingestor();
        let ready = ingestor.ingest("now.png", None, &png_bytes(20, 20)).unwrap();
        let stamped = parse_image_id(&ready.id).uploaded_at.unwrap();
        let drift = (Utc::now().naive_utc() - stamped).num_seconds().abs();
        assert!(drift < 120, "stamped {stamped}, drift {drift}s");
    }

    #[test]
    fn oversized_upload_is_rejected_before_intake() {
        let (tmp, store) = temp_store();
        let normalizer = Normalizer::new(
            FrameSpec::default(),
            ThumbnailSpec::default(),
            DecodeLimits {
                max_upload_bytes: 10,
                ..DecodeLimits::default()
            },
            NoConverter,
        );
        let ingestor = Ingestor::new(normalizer, store, tmp.path().join("photos_src")).unwrap();
        let err = ingestor.ingest("big.png", None, &png_bytes(64, 64)).unwrap_err();
        assert!(matches!(err, IngestError::Normalize(NormalizeError::ResourceExhausted(_))));
        assert!(dir_is_empty(ingestor.intake_dir()));
    }

    #[test]
    fn ingest_paths_reports_each_file() {
        let (tmp, ingestor) = ingestor();
        let good = tmp.path().join("good.jpg");
        let bad = tmp.path().join("bad.png");
        std::fs::write(&good, jpeg_bytes(320, 240)).unwrap();
        std::fs::write(&bad, b"nope").unwrap();

        let results = ingestor.ingest_paths(&[good.clone(), bad.clone()]);
        assert_eq!(results[0].0, good);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, bad);
        assert!(results[1].1.is_err());
        assert_eq!(ingestor.store().ids().unwrap().len(), 1);
    }

    #[test]
    fn sweep_intake_removes_stale_files() {
        let (_tmp, ingestor) = ingestor();
        std::fs::write(ingestor.intake_dir().join("20250101-000000-x-00000000.jpg"), b"x").unwrap();
        assert_eq!(ingestor.sweep_intake(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(ingestor.sweep_intake(Duration::ZERO).unwrap(), 1);
        assert!(dir_is_empty(ingestor.intake_dir()));
    }

    #[test]
    fn declared_type_from_extension() {
        assert_eq!(declared_from_extension(Path::new("a.JPG")), Some("image/jpeg"));
        assert_eq!(declared_from_extension(Path::new("a.heic")), Some("image/heic"));
        assert_eq!(declared_from_extension(Path::new("a.png")), Some("image/png"));
        assert_eq!(declared_from_extension(Path::new("noext")), None);
    }
}
