//! Common types used across the LIVES export service

use serde::{Deserialize, Serialize};

/// A normalized geographic locality key.
///
/// Localities partition the vendor dataset into exportable slices. Lookup is
/// case-insensitive, so the inner value is always stored trimmed and
/// lowercased; two `Locality` values constructed from `"Norfolk"` and
/// `" norfolk "` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locality(String);

impl Locality {
    /// Create a locality from raw caller input, normalizing it.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// The normalized locality name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the locality, used for artifact file names.
    ///
    /// Anything outside `[a-z0-9_-]` is replaced, so a hostile path segment
    /// can never escape the export directory.
    pub fn slug(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl std::fmt::Display for Locality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Locality {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
