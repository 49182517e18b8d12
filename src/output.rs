//! CLI output formatting for every subcommand.
//!
//! # Information-First Display
//!
//! Images are shown by their rotation position and a readable title derived
//! from the id (see [`naming::parse_image_id`](crate::naming::parse_image_id)),
//! with the raw id and upload time as indented context lines. The raw id is
//! what `delete` and `set-current` accept, so it is always printed.
//!
//! # Output Format
//!
//! ## List
//!
//! ```text
//! Ready (3 photos)
//! 001 beach
//!     Id: 20250118-093012-beach-3fa9c2d0
//!     Uploaded: 2025-01-18 09:30:12 UTC
//! 002 IMG 4411 (current)
//!     Id: 20250119-101500-IMG_4411-77e01b2a
//!     Uploaded: 2025-01-19 10:15:00 UTC
//! ```
//!
//! ## Status
//!
//! ```text
//! Rotation: positioned
//!     Current: 002/003 IMG 4411
//!     Id: 20250119-101500-IMG_4411-77e01b2a
//!     Generation: 4
//! Last render: rendered at 2025-01-19T10:20:00Z
//!     Id: 20250119-101500-IMG_4411-77e01b2a
//! ```
//!
//! ## Render
//!
//! ```text
//! Rendered 20250119-101500-IMG_4411-77e01b2a
//!     Next: 20250120-081011-dog-0c9de3f1
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::ingest::IngestError;
use crate::naming::parse_image_id;
use crate::render::{RenderRecord, RunOutcome};
use crate::rotation::{Phase, RotationStatus};
use crate::store::SweepReport;
use crate::types::{ImageId, ReadyImage};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Readable title of an id: the uploader's stem, or the id itself.
fn title(id: &ImageId) -> String {
    let parsed = parse_image_id(id);
    if parsed.display_title.trim().is_empty() {
        id.to_string()
    } else {
        parsed.display_title
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Print lines to stdout.
fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// list
// ============================================================================

/// Format the ready set in rotation order, marking the current image.
pub fn format_list(ids: &[ImageId], current: Option<&ImageId>) -> Vec<String> {
    if ids.is_empty() {
        return vec!["No ready images".to_string()];
    }

    let mut lines = vec![format!("Ready ({})", plural(ids.len(), "photo"))];
    for (i, id) in ids.iter().enumerate() {
        let marker = if Some(id) == current { " (current)" } else { "" };
        lines.push(format!("{} {}{}", format_index(i + 1), title(id), marker));
        lines.push(format!("{}Id: {}", indent(1), id));
        if let Some(at) = parse_image_id(id).uploaded_at {
            lines.push(format!("{}Uploaded: {} UTC", indent(1), at.format("%Y-%m-%d %H:%M:%S")));
        }
    }
    lines
}

pub fn print_list(ids: &[ImageId], current: Option<&ImageId>) {
    print_lines(format_list(ids, current));
}

// ============================================================================
// status
// ============================================================================

/// Format the rotation snapshot and the most recent render.
pub fn format_status(status: &RotationStatus, last: Option<&RenderRecord>) -> Vec<String> {
    let phase = match status.phase {
        Phase::Empty => "empty",
        Phase::Positioned => "positioned",
        Phase::Repairing => "repairing",
    };
    let mut lines = vec![format!("Rotation: {}", phase)];

    match (&status.cursor, status.position) {
        (Some(cursor), Some(pos)) => {
            lines.push(format!(
                "{}Current: {}/{} {}",
                indent(1),
                format_index(pos + 1),
                format_index(status.total),
                title(cursor)
            ));
            lines.push(format!("{}Id: {}", indent(1), cursor));
        }
        (Some(cursor), None) => {
            lines.push(format!("{}Current: {} (deleted, repaired on next render)", indent(1), cursor));
        }
        (None, _) if status.total > 0 => {
            lines.push(format!("{}Current: none yet ({} ready)", indent(1), plural(status.total, "photo")));
        }
        (None, _) => {}
    }
    lines.push(format!("{}Generation: {}", indent(1), status.generation));

    match last {
        Some(record) => {
            lines.push(format!(
                "Last render: {} at {}",
                record.outcome,
                record.at.format("%Y-%m-%dT%H:%M:%SZ")
            ));
            if let Some(id) = &record.id {
                lines.push(format!("{}Id: {}", indent(1), id));
            }
            if let Some(error) = &record.error {
                lines.push(format!("{}Error: {}", indent(1), error));
            }
        }
        None => lines.push("Last render: never".to_string()),
    }
    lines
}

pub fn print_status(status: &RotationStatus, last: Option<&RenderRecord>) {
    print_lines(format_status(status, last));
}

// ============================================================================
// ingest
// ============================================================================

/// Format one batch-ingest result.
///
/// ```text
/// IMG_4411.HEIC → 20250118-093012-IMG_4411-3fa9c2d0
/// notes.txt: corrupt input: unrecognized image data
/// ```
pub fn format_ingest_result(path: &Path, result: &Result<ReadyImage, IngestError>) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    match result {
        Ok(ready) => format!("{} → {}", name, ready.id),
        Err(e) => format!("{}: {}", name, e),
    }
}

/// Summary line after a batch ingest.
pub fn format_ingest_summary(ingested: usize, failed: usize) -> String {
    if failed == 0 {
        format!("Ingested {}", plural(ingested, "photo"))
    } else {
        format!("Ingested {}, {} failed", plural(ingested, "photo"), failed)
    }
}

pub fn print_ingest_results(results: &[(std::path::PathBuf, Result<ReadyImage, IngestError>)]) {
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    let mut lines: Vec<String> = results
        .iter()
        .map(|(path, result)| format_ingest_result(path, result))
        .collect();
    lines.push(format_ingest_summary(results.len() - failed, failed));
    print_lines(lines);
}

// ============================================================================
// render / advance / set-current
// ============================================================================

pub fn format_outcome(outcome: &RunOutcome) -> Vec<String> {
    match outcome {
        RunOutcome::Rendered { id, next } => {
            let mut lines = vec![format!("Rendered {}", id)];
            if let Some(next) = next {
                lines.push(format!("{}Next: {}", indent(1), next));
            }
            lines
        }
        RunOutcome::NothingToShow => vec!["Nothing to show".to_string()],
        RunOutcome::Busy => vec!["Render already in progress".to_string()],
        RunOutcome::DisplayFailed { id, error } => vec![
            format!("Display failed for {}", id),
            format!("{}Error: {}", indent(1), error),
        ],
    }
}

pub fn print_outcome(outcome: &RunOutcome) {
    print_lines(format_outcome(outcome));
}

pub fn format_current(id: Option<&ImageId>) -> String {
    match id {
        Some(id) => format!("Current: {}", id),
        None => "No ready images".to_string(),
    }
}

// ============================================================================
// delete / sweep
// ============================================================================

pub fn format_deleted(id: &ImageId) -> String {
    format!("Deleted {}", id)
}

pub fn format_sweep(report: &SweepReport, intake_files: usize) -> Vec<String> {
    let total = report.temp_files + report.orphan_thumbnails + intake_files;
    if total == 0 {
        return vec!["Nothing to sweep".to_string()];
    }
    vec![
        format!("Swept {}", plural(total, "file")),
        format!("{}Temp files: {}", indent(1), report.temp_files),
        format!("{}Orphan thumbnails: {}", indent(1), report.orphan_thumbnails),
        format!("{}Stale uploads: {}", indent(1), intake_files),
    ]
}

pub fn print_sweep(report: &SweepReport, intake_files: usize) {
    print_lines(format_sweep(report, intake_files));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::NormalizeError;
    use crate::test_helpers::id;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads_to_three() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn title_uses_stem() {
        assert_eq!(title(&id("20250118-093012-IMG_4411-3fa9c2d0")), "IMG 4411");
    }

    #[test]
    fn title_falls_back_to_id() {
        assert_eq!(title(&id("hand-placed")), "hand placed");
    }

    // =========================================================================
    // list
    // =========================================================================

    #[test]
    fn list_marks_current() {
        let ids = vec![
            id("20250118-093012-beach-3fa9c2d0"),
            id("20250119-101500-IMG_4411-77e01b2a"),
        ];
        let lines = format_list(&ids, Some(&ids[1]));
        assert_eq!(
            lines,
            vec![
                "Ready (2 photos)",
                "001 beach",
                "    Id: 20250118-093012-beach-3fa9c2d0",
                "    Uploaded: 2025-01-18 09:30:12 UTC",
                "002 IMG 4411 (current)",
                "    Id: 20250119-101500-IMG_4411-77e01b2a",
                "    Uploaded: 2025-01-19 10:15:00 UTC",
            ]
        );
    }

    #[test]
    fn list_empty() {
        assert_eq!(format_list(&[], None), vec!["No ready images"]);
    }

    // =========================================================================
    // status
    // =========================================================================

    #[test]
    fn status_positioned_with_last_render() {
        let cursor = id("20250119-101500-IMG_4411-77e01b2a");
        let status = RotationStatus {
            phase: Phase::Positioned,
            cursor: Some(cursor.clone()),
            position: Some(1),
            total: 3,
            generation: 4,
        };
        let record = RenderRecord {
            at: Utc.with_ymd_and_hms(2025, 1, 19, 10, 20, 0).unwrap(),
            outcome: "display-failed".to_string(),
            id: Some(cursor),
            error: Some("panel busy".to_string()),
        };
        let lines = format_status(&status, Some(&record));
        assert_eq!(
            lines,
            vec![
                "Rotation: positioned",
                "    Current: 002/003 IMG 4411",
                "    Id: 20250119-101500-IMG_4411-77e01b2a",
                "    Generation: 4",
                "Last render: display-failed at 2025-01-19T10:20:00Z",
                "    Id: 20250119-101500-IMG_4411-77e01b2a",
                "    Error: panel busy",
            ]
        );
    }

    #[test]
    fn status_empty_never_rendered() {
        let status = RotationStatus {
            phase: Phase::Empty,
            cursor: None,
            position: None,
            total: 0,
            generation: 0,
        };
        assert_eq!(
            format_status(&status, None),
            vec!["Rotation: empty", "    Generation: 0", "Last render: never"]
        );
    }

    #[test]
    fn status_repairing_mentions_deleted_cursor() {
        let status = RotationStatus {
            phase: Phase::Repairing,
            cursor: Some(id("gone")),
            position: None,
            total: 2,
            generation: 9,
        };
        let lines = format_status(&status, None);
        assert!(lines[1].contains("gone (deleted"));
    }

    // =========================================================================
    // ingest / render / sweep
    // =========================================================================

    #[test]
    fn ingest_result_lines() {
        let ok: Result<ReadyImage, IngestError> = Ok(ReadyImage {
            id: id("20250118-093012-a-00000000"),
            path: PathBuf::from("/ready/x.bmp"),
            bytes: vec![],
        });
        assert_eq!(
            format_ingest_result(Path::new("/in/a.jpg"), &ok),
            "a.jpg → 20250118-093012-a-00000000"
        );

        let err: Result<ReadyImage, IngestError> = Err(IngestError::Normalize(
            NormalizeError::CorruptInput("unrecognized image data".into()),
        ));
        assert_eq!(
            format_ingest_result(Path::new("notes.txt"), &err),
            "notes.txt: corrupt input: unrecognized image data"
        );
    }

    #[test]
    fn ingest_summary() {
        assert_eq!(format_ingest_summary(1, 0), "Ingested 1 photo");
        assert_eq!(format_ingest_summary(3, 2), "Ingested 3 photos, 2 failed");
    }

    #[test]
    fn outcome_lines() {
        assert_eq!(
            format_outcome(&RunOutcome::Rendered {
                id: id("a"),
                next: Some(id("b"))
            }),
            vec!["Rendered a", "    Next: b"]
        );
        assert_eq!(format_outcome(&RunOutcome::Busy), vec!["Render already in progress"]);
        assert_eq!(
            format_outcome(&RunOutcome::DisplayFailed {
                id: id("a"),
                error: "timeout".into()
            }),
            vec!["Display failed for a", "    Error: timeout"]
        );
    }

    #[test]
    fn sweep_lines() {
        assert_eq!(format_sweep(&SweepReport::default(), 0), vec!["Nothing to sweep"]);
        let lines = format_sweep(
            &SweepReport {
                temp_files: 1,
                orphan_thumbnails: 2,
            },
            0,
        );
        assert_eq!(lines[0], "Swept 3 files");
    }

    #[test]
    fn current_line() {
        assert_eq!(format_current(Some(&id("a"))), "Current: a");
        assert_eq!(format_current(None), "No ready images");
    }
}
