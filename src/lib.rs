//! # Photoframe
//!
//! Upload photographs, normalize them into panel-ready bitmaps, and rotate
//! through them on a low-refresh-rate display such as an e-paper frame.
//!
//! # Architecture: Ingest, Publish, Rotate, Render
//!
//! ```text
//! upload ─▶ Ingestor ─▶ Normalizer ─▶ ReadySet ─▶ RotationTracker ─▶ RenderJob ─▶ Display
//!           photos_src/               photos_ready/  state/rotation.json
//!                                     thumbs/
//! ```
//!
//! Every stage communicates through the filesystem. The uploader and the
//! scheduled render job are separate processes that never share memory, so
//! correctness rests on two primitives: files are published by rename, and the
//! rotation pointer is a small JSON record that is itself replaced by rename.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`ingest`] | Accepts uploads, tracks the intake copy, normalizes and publishes |
//! | [`imaging`] | Format detection, decoding with limits, letterboxing, dithering, encoding |
//! | [`store`] | The ready set: atomic publish, ordered listing, delete, sweep |
//! | [`rotation`] | Durable "current image" pointer with repair when images vanish |
//! | [`render`] | One scheduled run: lock, show current, advance on success |
//! | [`display`] | The panel capability and its command/mirror implementations |
//! | [`command`] | Running external helpers (converter, panel driver) with a deadline |
//! | [`config`] | `photoframe.toml` loading, merging onto stock defaults, validation |
//! | [`naming`] | Generated image ids and their parsing back into titles |
//! | [`types`] | `ImageId` and `ReadyImage`, shared by every stage |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Rotation Order Is Id Order
//!
//! Ids start with the upload timestamp, so sorting the ready directory by id
//! gives upload order with no separate index to keep consistent. New uploads
//! land at the end of the rotation; the pointer never moves on its own.
//!
//! ## Advance Only After the Panel Confirms
//!
//! A render that fails leaves the pointer where it was. The next scheduled
//! run retries the same image, so a flaky panel delays the rotation but never
//! skips a photograph.
//!
//! ## Everything Precomputed at Upload
//!
//! Decoding a 12-megapixel HEIC and dithering it takes seconds on a Pi Zero.
//! That cost is paid once, at upload, where the uploader can be told about a
//! bad file. The render job only reads a finished bitmap.

pub mod command;
pub mod config;
pub mod display;
pub mod imaging;
pub mod ingest;
pub mod naming;
pub mod output;
pub mod render;
pub mod rotation;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
