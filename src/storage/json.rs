//! JSON-file implementation of the state store

use crate::state::ItemId;
use crate::storage::schema::{
    size_mb, FetchedDocument, FileEntry, ProcessedDocument, ProcessedEntry, RunResultsDocument,
};
use crate::storage::traits::{StateStore, StorageError, StorageResult};
use crate::storage::{FetchedAssetRecord, ReconcileReport, ZeroByteCleanup};
use crate::url::has_media_extension;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Locations of the two state documents
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub processed: PathBuf,
    pub fetched: PathBuf,
}

/// State store backed by two JSON documents
#[derive(Debug)]
pub struct JsonStore {
    paths: StorePaths,
    download_root: PathBuf,
    extensions: Vec<String>,
    processed: HashSet<ItemId>,
    fetched: HashMap<String, FetchedAssetRecord>,
}

impl JsonStore {
    /// Loads both documents
    ///
    /// A missing document starts empty. An unreadable or unparsable document
    /// also starts empty, with a warning; the next flush overwrites it.
    pub fn load(paths: StorePaths, download_root: &Path, media_extensions: &[String]) -> Self {
        let processed = read_document::<ProcessedDocument>(&paths.processed)
            .map(|doc| doc.items.into_iter().map(|e| e.item_id).collect())
            .unwrap_or_default();

        let fetched = read_document::<FetchedDocument>(&paths.fetched)
            .map(|doc| {
                doc.files
                    .into_iter()
                    .map(|entry| (entry.filename.clone(), FetchedAssetRecord::from(entry)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            paths,
            download_root: download_root.to_path_buf(),
            extensions: media_extensions.iter().map(|e| e.to_lowercase()).collect(),
            processed,
            fetched,
        }
    }

    /// Deletes the given zero-byte files and drops their records
    ///
    /// Files that have grown since they were found are left alone.
    pub fn remove_zero_byte_files(&mut self, files: &[PathBuf]) -> ZeroByteCleanup {
        let mut cleanup = ZeroByteCleanup::default();

        for path in files {
            match std::fs::metadata(path) {
                Ok(meta) if meta.len() > 0 => {
                    tracing::debug!("Skipping {}: no longer empty", path.display());
                    continue;
                }
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    cleanup.failed.push((path.clone(), e.to_string()));
                    continue;
                }
                _ => {}
            }

            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    cleanup.failed.push((path.clone(), e.to_string()));
                    continue;
                }
            }

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                self.fetched.remove(name);
            }
            tracing::info!("Removed empty file {}", path.display());
            cleanup.removed.push(path.clone());
        }

        cleanup
    }

    fn processed_document(&self) -> ProcessedDocument {
        let mut ids: Vec<&ItemId> = self.processed.iter().collect();
        ids.sort();

        ProcessedDocument {
            scan_time: now_rfc3339(),
            total_items: ids.len(),
            items: ids
                .into_iter()
                .map(|id| ProcessedEntry {
                    item_id: id.clone(),
                })
                .collect(),
        }
    }

    fn fetched_document(&self) -> FetchedDocument {
        let mut records: Vec<&FetchedAssetRecord> = self.fetched.values().collect();
        records.sort_by(|a, b| {
            a.directory
                .cmp(&b.directory)
                .then_with(|| a.filename.cmp(&b.filename))
        });

        let total_size_bytes: u64 = records.iter().map(|r| r.size).sum();

        FetchedDocument {
            scan_time: now_rfc3339(),
            download_directory: self.download_root.display().to_string(),
            total_files: records.len(),
            total_size_bytes,
            total_size_mb: size_mb(total_size_bytes),
            files: records.into_iter().map(FileEntry::from).collect(),
        }
    }
}

impl StateStore for JsonStore {
    fn is_processed(&self, item: &ItemId) -> bool {
        self.processed.contains(item)
    }

    fn mark_processed(&mut self, item: ItemId) {
        self.processed.insert(item);
    }

    fn reset_processed(&mut self) -> usize {
        let count = self.processed.len();
        self.processed.clear();
        count
    }

    fn processed_count(&self) -> usize {
        self.processed.len()
    }

    fn is_fetched(&self, filename: &str) -> bool {
        self.fetched
            .get(filename)
            .is_some_and(FetchedAssetRecord::is_usable)
    }

    fn fetched(&self, filename: &str) -> Option<&FetchedAssetRecord> {
        self.fetched.get(filename)
    }

    fn records_for_item(&self, item: &ItemId) -> Vec<&FetchedAssetRecord> {
        self.fetched
            .values()
            .filter(|record| record.is_owned_by(item))
            .collect()
    }

    fn mark_fetched(&mut self, record: FetchedAssetRecord) {
        self.fetched.insert(record.filename.clone(), record);
    }

    fn remove_fetched(&mut self, filename: &str) -> Option<FetchedAssetRecord> {
        self.fetched.remove(filename)
    }

    fn fetched_count(&self) -> usize {
        self.fetched.len()
    }

    fn destination(&self) -> &Path {
        &self.download_root
    }

    fn reconcile(&mut self) -> StorageResult<ReconcileReport> {
        let present = scan_media_files(&self.download_root, &self.extensions)?;
        let mut report = ReconcileReport::default();

        let missing: Vec<String> = self
            .fetched
            .keys()
            .filter(|name| !present.contains_key(*name))
            .cloned()
            .collect();

        for name in missing {
            tracing::debug!("Dropping record for missing file {}", name);
            self.fetched.remove(&name);
            report.removed += 1;
        }

        for (name, scanned) in present {
            match self.fetched.get_mut(&name) {
                Some(existing) => {
                    if existing.size != scanned.size
                        || existing.modified_time != scanned.modified_time
                    {
                        report.refreshed += 1;
                    }
                    existing.size = scanned.size;
                    existing.modified_time = scanned.modified_time;
                    existing.filepath = scanned.filepath;
                    existing.directory = scanned.directory;
                }
                None => {
                    tracing::debug!("Recording unrecorded file {}", name);
                    self.fetched.insert(name, scanned);
                    report.added += 1;
                }
            }
        }

        Ok(report)
    }

    fn flush(&self) -> StorageResult<()> {
        write_document(&self.paths.processed, &self.processed_document())?;
        write_document(&self.paths.fetched, &self.fetched_document())?;
        Ok(())
    }
}

/// Builds a record for a file under the download root
pub fn record_for_file(
    root: &Path,
    path: &Path,
    item_id: Option<ItemId>,
) -> std::io::Result<FetchedAssetRecord> {
    let meta = std::fs::metadata(path)?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let directory = path
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| rel.to_string_lossy().into_owned())
        .filter(|rel| !rel.is_empty())
        .unwrap_or_else(|| ".".to_string());

    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let modified_time = meta
        .modified()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default();

    Ok(FetchedAssetRecord {
        filename,
        filepath: path.display().to_string(),
        directory,
        size: meta.len(),
        modified_time,
        extension,
        item_id,
    })
}

/// Writes the summary of a finished crawl to `path`
pub fn write_run_results(
    path: &Path,
    tags: &str,
    total_items: usize,
    downloaded_files: &[String],
    stop_reason: &str,
) -> StorageResult<()> {
    let doc = RunResultsDocument {
        download_time: now_rfc3339(),
        tags: tags.to_string(),
        total_items,
        downloaded_count: downloaded_files.len(),
        downloaded_files: downloaded_files.to_vec(),
        stop_reason: stop_reason.to_string(),
    };
    write_document(path, &doc)
}

/// Lists every media file of size zero under `root`
pub fn find_zero_byte_files(root: &Path, extensions: &[String]) -> StorageResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = scan_media_files(root, extensions)?
        .into_values()
        .filter(|record| record.size == 0)
        .map(|record| PathBuf::from(record.filepath))
        .collect();
    files.sort();
    Ok(files)
}

/// Walks the tree and builds an unowned record for every media file
fn scan_media_files(
    root: &Path,
    extensions: &[String],
) -> StorageResult<HashMap<String, FetchedAssetRecord>> {
    let mut found = HashMap::new();

    if !root.exists() {
        return Ok(found);
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(StorageError::Walk(e)),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !has_media_extension(name, extensions) {
            continue;
        }

        let record = record_for_file(root, entry.path(), None)
            .map_err(|e| StorageError::io(entry.path(), e))?;

        if let Some(previous) = found.get(&record.filename) {
            tracing::warn!(
                "Duplicate filename {} in {} and {}; keeping the first",
                record.filename,
                previous.directory,
                record.directory
            );
            continue;
        }
        found.insert(record.filename.clone(), record);
    }

    Ok(found)
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No state document at {}, starting empty", path.display());
            return None;
        }
        Err(e) => {
            tracing::warn!(
                "Could not read {}: {}; starting with empty state",
                path.display(),
                e
            );
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(
                "Could not parse {}: {}; starting with empty state",
                path.display(),
                e
            );
            None
        }
    }
}

/// Writes `<path>.tmp` then renames it over `path`
fn write_document<T: Serialize>(path: &Path, doc: &T) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(doc)?;

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = std::fs::write(&tmp_path, json)
        .and_then(|()| std::fs::rename(&tmp_path, path))
        .map_err(|e| StorageError::io(path, e));

    if result.is_err() && tmp_path.exists() {
        let _ = std::fs::remove_file(&tmp_path);
    }

    result
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["mp4".to_string(), "webm".to_string()]
    }

    fn store_in(dir: &TempDir) -> JsonStore {
        let paths = StorePaths {
            processed: dir.path().join("processed-items.json"),
            fetched: dir.path().join("fetched-assets.json"),
        };
        JsonStore::load(paths, &dir.path().join("downloads"), &exts())
    }

    fn write_file(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_missing_documents_start_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.processed_count(), 0);
        assert_eq!(store.fetched_count(), 0);
    }

    #[test]
    fn test_corrupt_document_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("processed-items.json"), "{ not json").unwrap();
        let store = store_in(&dir);
        assert_eq!(store.processed_count(), 0);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        write_file(&root.join("abc_101.mp4"), b"0123456789");

        let mut store = store_in(&dir);
        store.mark_processed(ItemId::new("101"));
        store.mark_processed(ItemId::new("102"));
        let record =
            record_for_file(&root, &root.join("abc_101.mp4"), Some(ItemId::new("101"))).unwrap();
        store.mark_fetched(record);
        store.flush().unwrap();

        assert!(!dir.path().join("processed-items.json.tmp").exists());

        let reloaded = store_in(&dir);
        assert!(reloaded.is_processed(&ItemId::new("101")));
        assert!(reloaded.is_processed(&ItemId::new("102")));
        let record = reloaded.fetched("abc_101.mp4").unwrap();
        assert_eq!(record.size, 10);
        assert_eq!(record.directory, ".");
        assert_eq!(record.extension, ".mp4");
        assert!(record.is_owned_by(&ItemId::new("101")));
    }

    #[test]
    fn test_flush_writes_expected_layout() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.mark_processed(ItemId::new("7"));
        store.flush().unwrap();

        let raw = std::fs::read_to_string(dir.path().join("processed-items.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["total_items"], 1);
        assert_eq!(value["items"][0]["item_id"], "7");

        let raw = std::fs::read_to_string(dir.path().join("fetched-assets.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["total_files"], 0);
        assert!(value["files"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_adds_and_removes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        write_file(&root.join("kept_1.mp4"), b"abc");
        write_file(&root.join("nested/found_2.webm"), b"abcdef");
        write_file(&root.join("notes.txt"), b"ignored");
        write_file(&root.join("partial_3.mp4.part"), b"ignored");

        let mut store = store_in(&dir);
        let kept = record_for_file(&root, &root.join("kept_1.mp4"), Some(ItemId::new("1"))).unwrap();
        store.mark_fetched(kept);
        store.mark_fetched(FetchedAssetRecord {
            filename: "gone_9.mp4".to_string(),
            filepath: root.join("gone_9.mp4").display().to_string(),
            directory: ".".to_string(),
            size: 100,
            modified_time: String::new(),
            extension: ".mp4".to_string(),
            item_id: Some(ItemId::new("9")),
        });

        let report = store.reconcile().unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);

        assert!(!store.is_fetched("gone_9.mp4"));
        assert!(!store.is_fetched("partial_3.mp4.part"));
        assert!(store.fetched("kept_1.mp4").unwrap().is_owned_by(&ItemId::new("1")));

        let found = store.fetched("found_2.webm").unwrap();
        assert_eq!(found.size, 6);
        assert_eq!(found.directory, "nested");
        assert!(found.item_id.is_none());
    }

    #[test]
    fn test_reconcile_refreshes_size() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        let path = root.join("grow_1.mp4");
        write_file(&path, b"a");

        let mut store = store_in(&dir);
        store.mark_fetched(record_for_file(&root, &path, Some(ItemId::new("1"))).unwrap());

        std::fs::write(&path, b"abcd").unwrap();
        store.reconcile().unwrap();
        assert_eq!(store.fetched("grow_1.mp4").unwrap().size, 4);
    }

    #[test]
    fn test_reconcile_without_download_dir() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(store.reconcile().unwrap().is_empty());
    }

    #[test]
    fn test_zero_byte_cleanup_drops_records() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        write_file(&root.join("empty_1.mp4"), b"");
        write_file(&root.join("full_2.mp4"), b"data");

        let mut store = store_in(&dir);
        store.reconcile().unwrap();
        assert!(store.fetched("empty_1.mp4").is_some());
        assert!(!store.is_fetched("empty_1.mp4"));

        let empty = find_zero_byte_files(&root, &exts()).unwrap();
        assert_eq!(empty, vec![root.join("empty_1.mp4")]);

        let cleanup = store.remove_zero_byte_files(&empty);
        assert_eq!(cleanup.removed.len(), 1);
        assert!(cleanup.failed.is_empty());
        assert!(!root.join("empty_1.mp4").exists());
        assert!(store.fetched("empty_1.mp4").is_none());
        assert!(store.is_fetched("full_2.mp4"));
    }

    #[test]
    fn test_reset_processed() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.mark_processed(ItemId::new("1"));
        store.mark_processed(ItemId::new("2"));
        assert_eq!(store.reset_processed(), 2);
        assert!(!store.is_processed(&ItemId::new("1")));
    }

    #[test]
    fn test_records_for_item() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        write_file(&root.join("a_1.mp4"), b"x");
        write_file(&root.join("b_2.mp4"), b"y");

        let mut store = store_in(&dir);
        store.mark_fetched(record_for_file(&root, &root.join("a_1.mp4"), Some(ItemId::new("1"))).unwrap());
        store.mark_fetched(record_for_file(&root, &root.join("b_2.mp4"), None).unwrap());

        let owned = store.records_for_item(&ItemId::new("1"));
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].filename, "a_1.mp4");
        assert!(store.records_for_item(&ItemId::new("2")).is_empty());
    }

    #[test]
    fn test_run_results_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("download-results.json");
        let files = vec!["a_1.mp4".to_string(), "b_2.webm".to_string()];

        write_run_results(&path, "alpha video", 3, &files, "listing exhausted").unwrap();

        let doc: RunResultsDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc.tags, "alpha video");
        assert_eq!(doc.total_items, 3);
        assert_eq!(doc.downloaded_count, 2);
        assert_eq!(doc.downloaded_files, files);
        assert_eq!(doc.stop_reason, "listing exhausted");
        assert!(!doc.download_time.is_empty());
    }
}
