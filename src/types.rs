//! Shared types used across the pipeline.
//!
//! [`ImageId`] is the one name every stage agrees on: the store derives file
//! names from it, the rotation record persists it, and the CLI accepts it from
//! users. It is validated on construction so that an id can always be joined
//! onto a store directory without escaping it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Longest identifier accepted. Generated ids stay well below this.
const MAX_ID_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid image id {0:?}")]
pub struct InvalidId(pub String);

/// Identifier of a ready image, e.g. `20250118-093012-IMG_4411-3fa9c2d0`.
///
/// Allowed characters are ASCII alphanumerics, `.`, `_` and `-`. Leading dots
/// are rejected because hidden names are reserved for in-flight temp files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    pub fn parse(raw: &str) -> Result<Self, InvalidId> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidId(raw.to_string()))
        }
    }

    /// Wrap a string built only from the id alphabet, e.g. by
    /// [`generate_id`](crate::naming::generate_id).
    pub(crate) fn from_generated(raw: String) -> Self {
        debug_assert!(Self::parse(&raw).is_ok(), "generated id {raw:?} is invalid");
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

/// A published, display-ready image together with its loaded bytes.
///
/// Holding the bytes rather than only the path means a render can finish
/// even if the file is deleted by the upload side halfway through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyImage {
    pub id: ImageId,
    /// Location in the ready directory at the time it was read.
    pub path: PathBuf,
    /// Encoded panel-sized bitmap.
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_generated_shape() {
        let id = ImageId::parse("20250118-093012-IMG_4411.v2-3fa9c2d0").unwrap();
        assert_eq!(id.as_str(), "20250118-093012-IMG_4411.v2-3fa9c2d0");
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(ImageId::parse("../etc/passwd").is_err());
        assert!(ImageId::parse("a/b").is_err());
        assert!(ImageId::parse("a\\b").is_err());
    }

    #[test]
    fn rejects_hidden_and_empty() {
        assert!(ImageId::parse("").is_err());
        assert!(ImageId::parse(".incoming-x").is_err());
    }

    #[test]
    fn rejects_overlong() {
        assert!(ImageId::parse(&"a".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(ImageId::parse(&"a".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: ImageId = serde_json::from_str(r#""abc-123""#).unwrap();
        assert_eq!(ok.as_str(), "abc-123");
        assert!(serde_json::from_str::<ImageId>(r#""../x""#).is_err());
    }

    #[test]
    fn orders_by_name() {
        let a = ImageId::parse("20250101-000000-a").unwrap();
        let b = ImageId::parse("20250102-000000-a").unwrap();
        assert!(a < b);
    }
}
