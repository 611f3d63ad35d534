//! Storage traits and error types
//!
//! This module defines the trait interface for state backends and the
//! associated error types.

use crate::state::ItemId;
use crate::storage::{FetchedAssetRecord, ReconcileReport};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for state backend implementations
///
/// Holds the two durable facts the harvester needs: which items are already
/// processed, and which asset files are already fetched (keyed by filename).
/// Mutations stay in memory until `flush`.
pub trait StateStore: Send {
    // ===== Processed Items =====

    fn is_processed(&self, item: &ItemId) -> bool;

    fn mark_processed(&mut self, item: ItemId);

    /// Drops every processed record, returning how many were removed
    fn reset_processed(&mut self) -> usize;

    fn processed_count(&self) -> usize;

    // ===== Fetched Assets =====

    /// True only for a record with nonzero size; zero-byte records never count
    fn is_fetched(&self, filename: &str) -> bool;

    fn fetched(&self, filename: &str) -> Option<&FetchedAssetRecord>;

    /// All records created by a download for the given item
    fn records_for_item(&self, item: &ItemId) -> Vec<&FetchedAssetRecord>;

    /// Inserts a record, replacing any record with the same filename
    fn mark_fetched(&mut self, record: FetchedAssetRecord);

    fn remove_fetched(&mut self, filename: &str) -> Option<FetchedAssetRecord>;

    fn fetched_count(&self) -> usize;

    // ===== Maintenance =====

    /// Directory tree the fetched records describe
    fn destination(&self) -> &Path;

    /// Moves the fetched records toward what is actually on disk
    ///
    /// Records for missing files are removed, unrecorded media files are
    /// added without an owner, and sizes of present files are refreshed.
    fn reconcile(&mut self) -> StorageResult<ReconcileReport>;

    /// Writes both documents atomically
    fn flush(&self) -> StorageResult<()>;
}
