//! Run-scoped bookkeeping shared by the fetch workers
//!
//! `RunContext` pairs the persistent store with the sets that only live for
//! one run: assets completed this run, assets currently being fetched, and
//! filenames reserved by in-flight downloads. Everything here is mutated under
//! one lock, so each check-then-act step below is atomic.

use crate::crawler::downloader::derive_filename;
use crate::state::ItemId;
use crate::storage::{record_for_file, FetchedAssetRecord, StateStore};
use crate::url::AssetRef;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the run context
pub type SharedContext = Arc<Mutex<RunContext>>;

/// Result of trying to take ownership of an asset for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Already settled this run under the given filename
    Completed(String),
    /// Another worker holds it; wait and claim again
    InFlight,
    /// The caller now owns it and must finish or release it
    Claimed,
}

/// What a worker should do with a claimed asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePlan {
    /// A usable copy already exists
    Present(String),
    /// Download into `path`; `filename` is reserved until finished or released
    Download { filename: String, path: PathBuf },
}

pub struct RunContext {
    store: Box<dyn StateStore>,
    completed: HashMap<String, String>,
    in_flight: HashSet<String>,
    reserved: HashSet<String>,
}

impl RunContext {
    pub fn new(store: Box<dyn StateStore>) -> Self {
        Self {
            store,
            completed: HashMap::new(),
            in_flight: HashSet::new(),
            reserved: HashSet::new(),
        }
    }

    pub fn shared(store: Box<dyn StateStore>) -> SharedContext {
        Arc::new(Mutex::new(Self::new(store)))
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn StateStore {
        self.store.as_mut()
    }

    pub fn claim(&mut self, asset: &AssetRef) -> Claim {
        if let Some(filename) = self.completed.get(asset.canonical()) {
            return Claim::Completed(filename.clone());
        }
        if self.in_flight.contains(asset.canonical()) {
            return Claim::InFlight;
        }
        self.in_flight.insert(asset.canonical().to_string());
        Claim::Claimed
    }

    /// Decides between "already present" and a download target
    ///
    /// # Rules
    ///
    /// - A usable record owned by the item means present
    /// - Walk the candidate names `name`, `name_duplicate-1`, ...:
    ///   - a name reserved by another in-flight download is a collision
    ///   - a usable record owned by this item means present
    ///   - an unowned record with nonzero size means present (and is adopted)
    ///   - a zero-byte record owned by this item is dropped and the name is
    ///     downloaded again
    ///   - any other record is a collision
    ///   - an unrecorded file on disk with nonzero size means present
    ///   - an unrecorded zero-byte file is a collision
    ///   - a missing file means the name is free and gets reserved
    ///
    /// Errors other than "not found" while inspecting the destination are
    /// returned and nothing is reserved.
    pub fn plan(
        &mut self,
        item: &ItemId,
        asset: &AssetRef,
        extensions: &[String],
    ) -> io::Result<FilePlan> {
        if let Some(record) = self
            .store
            .records_for_item(item)
            .into_iter()
            .find(|record| record.is_usable())
        {
            return Ok(FilePlan::Present(record.filename.clone()));
        }

        let root = self.store.destination().to_path_buf();
        let derived = derive_filename(asset.url(), item, extensions);
        let mut attempt = 0;

        loop {
            let name = derived.candidate(attempt);
            attempt += 1;

            if self.reserved.contains(&name) {
                continue;
            }

            let existing = self.store.fetched(&name).map(|record| {
                (
                    record.is_owned_by(item),
                    record.item_id.is_none(),
                    record.is_usable(),
                )
            });

            let mut replace_empty = false;
            match existing {
                Some((true, _, true)) => return Ok(FilePlan::Present(name)),
                Some((_, true, true)) => {
                    self.adopt(&name, item);
                    return Ok(FilePlan::Present(name));
                }
                Some((true, _, false)) => {
                    tracing::debug!("Record for {} is empty, fetching it again", name);
                    self.store.remove_fetched(&name);
                    replace_empty = true;
                }
                Some(_) => continue,
                None => {}
            }

            let path = root.join(&name);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.len() > 0 => {
                    let record = record_for_file(&root, &path, Some(item.clone()))?;
                    self.store.mark_fetched(record);
                    return Ok(FilePlan::Present(name));
                }
                Ok(_) if !replace_empty => continue,
                Ok(_) => return Ok(self.reserve(name, path)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(self.reserve(name, path));
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn finish_present(&mut self, asset: &AssetRef, filename: &str) {
        self.in_flight.remove(asset.canonical());
        self.completed
            .insert(asset.canonical().to_string(), filename.to_string());
    }

    pub fn finish_download(&mut self, asset: &AssetRef, record: FetchedAssetRecord) {
        self.in_flight.remove(asset.canonical());
        self.reserved.remove(&record.filename);
        self.completed
            .insert(asset.canonical().to_string(), record.filename.clone());
        self.store.mark_fetched(record);
    }

    /// Gives up a claim without settling it
    pub fn release(&mut self, asset: &AssetRef, filename: Option<&str>) {
        self.in_flight.remove(asset.canonical());
        if let Some(filename) = filename {
            self.reserved.remove(filename);
        }
    }

    fn reserve(&mut self, filename: String, path: PathBuf) -> FilePlan {
        self.reserved.insert(filename.clone());
        FilePlan::Download { filename, path }
    }

    fn adopt(&mut self, filename: &str, item: &ItemId) {
        if let Some(mut record) = self.store.remove_fetched(filename) {
            record.item_id = Some(item.clone());
            self.store.mark_fetched(record);
        }
    }
}

/// A `Claim::Claimed` asset held by one worker
///
/// Dropping the guard without settling it releases the claim and any
/// reserved filename, so a panicking or aborted worker never leaves the
/// asset stuck in flight.
pub struct ClaimGuard {
    context: SharedContext,
    asset: AssetRef,
    reserved: Option<String>,
    settled: bool,
}

impl ClaimGuard {
    pub fn new(context: SharedContext, asset: AssetRef) -> Self {
        Self {
            context,
            asset,
            reserved: None,
            settled: false,
        }
    }

    pub fn asset(&self) -> &AssetRef {
        &self.asset
    }

    /// Runs `RunContext::plan`, remembering a reserved filename for release
    pub fn plan(&mut self, item: &ItemId, extensions: &[String]) -> io::Result<FilePlan> {
        let plan = lock_context(&self.context).plan(item, &self.asset, extensions)?;
        if let FilePlan::Download { filename, .. } = &plan {
            self.reserved = Some(filename.clone());
        }
        Ok(plan)
    }

    pub fn destination(&self) -> PathBuf {
        lock_context(&self.context).store().destination().to_path_buf()
    }

    pub fn finish_present(mut self, filename: &str) {
        lock_context(&self.context).finish_present(&self.asset, filename);
        self.settled = true;
    }

    pub fn finish_download(mut self, record: FetchedAssetRecord) {
        lock_context(&self.context).finish_download(&self.asset, record);
        self.settled = true;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.settled {
            lock_context(&self.context).release(&self.asset, self.reserved.as_deref());
        }
    }
}

/// Locks the context, recovering the data if a worker panicked while holding it
pub fn lock_context(context: &Mutex<RunContext>) -> MutexGuard<'_, RunContext> {
    context
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
