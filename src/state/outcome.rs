use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key of one listing entry (a post id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id reduced to characters that are safe inside a file name
    pub fn file_safe(&self) -> String {
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

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What happened to one item in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A new file was written
    Downloaded { filename: String, bytes: u64 },

    /// The asset was already on disk or already fetched this run
    AlreadyPresent { filename: String },

    /// The item page had no usable asset
    NoAssetFound,

    /// Resolution or download failed; the item stays unprocessed
    Failed { reason: String },
}

impl FetchOutcome {
    /// Returns true if the item may be marked processed
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloaded { .. } => "downloaded",
            Self::AlreadyPresent { .. } => "already_present",
            Self::NoAssetFound => "no_asset_found",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloaded { filename, bytes } => {
                write!(f, "downloaded {} ({} bytes)", filename, bytes)
            }
            Self::AlreadyPresent { filename } => write!(f, "already present as {}", filename),
            Self::NoAssetFound => write!(f, "no asset found"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// An outcome paired with the item it belongs to
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item: ItemId,
    pub outcome: FetchOutcome,
}
