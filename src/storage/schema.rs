//! On-disk document layouts
//!
//! Both documents are complete snapshots, rewritten on every flush. Older
//! documents that call items "posts" are still accepted when reading.

use crate::state::ItemId;
use crate::storage::FetchedAssetRecord;
use serde::{Deserialize, Deserializer, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// The processed-items document
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessedDocument {
    #[serde(default)]
    pub scan_time: String,

    #[serde(default, alias = "total_posts")]
    pub total_items: usize,

    #[serde(default, alias = "posts")]
    pub items: Vec<ProcessedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessedEntry {
    #[serde(alias = "post_id", deserialize_with = "id_from_string_or_number")]
    pub item_id: ItemId,
}

/// Summary of one crawl, written when it stops
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResultsDocument {
    pub download_time: String,
    pub tags: String,
    /// Items that got an outcome during the run
    pub total_items: usize,
    pub downloaded_count: usize,
    pub downloaded_files: Vec<String>,
    pub stop_reason: String,
}

/// The fetched-assets document
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchedDocument {
    #[serde(default)]
    pub scan_time: String,

    #[serde(default)]
    pub download_directory: String,

    #[serde(default)]
    pub total_files: usize,

    #[serde(default)]
    pub total_size_bytes: u64,

    #[serde(default)]
    pub total_size_mb: f64,

    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,

    #[serde(default)]
    pub filepath: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub size_mb: f64,

    #[serde(default)]
    pub modified_time: String,

    #[serde(default = "default_directory")]
    pub directory: String,

    #[serde(default)]
    pub extension: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
}

fn default_directory() -> String {
    ".".to_string()
}

/// Megabytes rounded to two decimals
pub fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

impl From<&FetchedAssetRecord> for FileEntry {
    fn from(record: &FetchedAssetRecord) -> Self {
        Self {
            filename: record.filename.clone(),
            filepath: record.filepath.clone(),
            size: record.size,
            size_mb: size_mb(record.size),
            modified_time: record.modified_time.clone(),
            directory: record.directory.clone(),
            extension: record.extension.clone(),
            item_id: record.item_id.clone(),
        }
    }
}

impl From<FileEntry> for FetchedAssetRecord {
    fn from(entry: FileEntry) -> Self {
        Self {
            filename: entry.filename,
            filepath: entry.filepath,
            directory: entry.directory,
            size: entry.size,
            modified_time: entry.modified_time,
            extension: entry.extension,
            item_id: entry.item_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<ItemId, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => ItemId::new(s),
        RawId::Number(n) => ItemId::new(n.to_string()),
    })
}
