//! Storage module for persisting harvest state
//!
//! This module keeps the durable record that makes a harvest restartable:
//! - the set of processed items
//! - the fetched asset files, keyed by filename
//! - reconciliation of those records against the download directory
//! - zero-byte file maintenance

mod json;
mod schema;
mod traits;

pub use json::{find_zero_byte_files, record_for_file, write_run_results, JsonStore, StorePaths};
pub use traits::{StateStore, StorageError, StorageResult};

use crate::state::ItemId;

/// One asset file known to the store
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAssetRecord {
    pub filename: String,
    pub filepath: String,
    /// Directory relative to the download root, "." for the root itself
    pub directory: String,
    pub size: u64,
    pub modified_time: String,
    /// Lowercase extension including the dot
    pub extension: String,
    /// The item whose download created the file; None for files found on disk
    pub item_id: Option<ItemId>,
}

impl FetchedAssetRecord {
    /// Returns true if the record describes a usable (non-empty) file
    pub fn is_usable(&self) -> bool {
        self.size > 0
    }

    pub fn is_owned_by(&self, item: &ItemId) -> bool {
        self.item_id.as_ref() == Some(item)
    }
}

/// What a reconciliation pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    pub refreshed: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Result of a zero-byte cleanup
#[derive(Debug, Default)]
pub struct ZeroByteCleanup {
    pub removed: Vec<std::path::PathBuf>,
    pub failed: Vec<(std::path::PathBuf, String)>,
}
