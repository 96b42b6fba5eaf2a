//! Record store interface and the file-backed implementation.

use crate::document::{LoadReport, decode_document, encode_document};
use crate::error::StoreError;
use crate::model::MedicationRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dosealarm_protocol::RecordId;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[async_trait]
/// Persistence abstraction consumed by the alarm scheduler.
pub trait RecordStore: Send + Sync {
    /// Insert a record or replace the record with the same id.
    async fn put(&self, record: MedicationRecord) -> Result<(), StoreError>;

    /// Fetch a single record.
    async fn get(&self, id: &RecordId) -> Result<Option<MedicationRecord>, StoreError>;

    /// Fetch every record in insertion order.
    async fn get_all(&self) -> Result<Vec<MedicationRecord>, StoreError>;

    /// Remove a record, returning whether it existed.
    async fn delete(&self, id: &RecordId) -> Result<bool, StoreError>;

    /// Rewrite only the acknowledgement history of a record.
    async fn set_history(
        &self,
        id: &RecordId,
        history: Vec<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Append an acknowledgement and return the updated record.
    async fn append_history(
        &self,
        id: &RecordId,
        at: DateTime<Utc>,
    ) -> Result<MedicationRecord, StoreError> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.record_acknowledgement(at);
        self.set_history(id, record.history.clone()).await?;
        Ok(record)
    }

    /// Remove every record, returning how many were removed.
    async fn clear(&self) -> Result<usize, StoreError>;
}

/// Options for opening a [`FileRecordStore`].
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Location of the versioned record document.
    pub path: PathBuf,
    /// Older single-array document imported when `path` does not exist yet.
    pub legacy_path: Option<PathBuf>,
    /// Maximum acknowledgements kept per record.
    pub history_limit: Option<usize>,
}

impl FileStoreOptions {
    /// Options for a document at `path` with no legacy import and unbounded history.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            legacy_path: None,
            history_limit: None,
        }
    }

    /// Import records from a legacy document when the main one is missing.
    pub fn with_legacy_path(mut self, path: impl AsRef<Path>) -> Self {
        self.legacy_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Bound the acknowledgement history kept per record.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }
}

/// File-backed store keeping one JSON document with every record.
///
/// Records are cached in memory together with the size and modification time
/// of the document they came from. Reads reload the document when another
/// process changed it, and every mutation starts from a fresh read of the file
/// before rewriting it through a temporary file.
#[derive(Debug)]
pub struct FileRecordStore {
    /// Location of the record document.
    path: PathBuf,
    /// Maximum acknowledgements kept per record.
    history_limit: Option<usize>,
    /// Cached document; the lock also serializes writes.
    cache: Mutex<Cache>,
}

/// Identity of the document on disk, compared to detect outside writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug, Default)]
struct Cache {
    records: Vec<MedicationRecord>,
    /// Stamp of the document the records were read from or written to.
    stamp: Option<FileStamp>,
}

impl FileRecordStore {
    /// Open the document at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, LoadReport), StoreError> {
        Self::open_with_options(FileStoreOptions::new(path))
    }

    /// Open a store, migrating older documents to the current schema.
    pub fn open_with_options(
        options: FileStoreOptions,
    ) -> Result<(Self, LoadReport), StoreError> {
        let FileStoreOptions {
            path,
            legacy_path,
            history_limit,
        } = options;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let legacy_source = legacy_path.filter(|legacy| !path.exists() && legacy.exists());
        let (records, mut report) = match legacy_source.as_deref() {
            Some(legacy) => {
                info!(
                    "importing legacy record document (legacy={}, path={})",
                    legacy.display(),
                    path.display()
                );
                let (records, mut report) = load_document(legacy)?;
                report.migrated = true;
                (records, report)
            }
            None if path.exists() => load_document(&path)?,
            None => (Vec::new(), LoadReport::empty()),
        };
        for issue in &report.issues {
            warn!("record normalized on load (path={}): {issue}", path.display());
        }

        let mut records = records;
        if let Some(limit) = history_limit {
            for record in &mut records {
                record.trim_history(limit);
            }
        }

        let store = Self {
            path,
            history_limit,
            cache: Mutex::new(Cache::default()),
        };
        let stamp = if report.migrated {
            let stamp = store.persist(&records)?;
            info!(
                "record document migrated (from_version={}, records={})",
                report.schema_version,
                records.len()
            );
            stamp
        } else {
            file_stamp(&store.path)?
        };
        report.loaded = records.len();
        *store.cache.lock() = Cache { records, stamp };
        info!(
            "initialized file record store (path={}, records={})",
            store.path.display(),
            report.loaded
        );
        Ok((store, report))
    }

    /// Location of the record document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path to the temporary document used for atomic rewrites.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("records.json"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Rewrite the document atomically. Returns the stamp of the new document.
    fn persist(&self, records: &[MedicationRecord]) -> Result<Option<FileStamp>, StoreError> {
        let temp_path = self.temp_path();
        let contents = encode_document(records)?;
        {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        // rename replaces an existing document in one step.
        fs::rename(temp_path, &self.path)?;
        debug!(
            "record document written (path={}, records={})",
            self.path.display(),
            records.len()
        );
        file_stamp(&self.path)
    }

    /// Reload the document into `cache` if it changed on disk, or always when
    /// `force` is set. Normalization issues are logged only for changed files.
    fn refresh(&self, cache: &mut Cache, force: bool) -> Result<(), StoreError> {
        let current = file_stamp(&self.path)?;
        let changed = current != cache.stamp;
        if !changed && !force {
            return Ok(());
        }
        let mut records = match current {
            Some(_) => {
                let (records, report) = load_document(&self.path)?;
                if changed {
                    for issue in &report.issues {
                        warn!(
                            "record normalized on reload (path={}): {issue}",
                            self.path.display()
                        );
                    }
                }
                records
            }
            None => Vec::new(),
        };
        if let Some(limit) = self.history_limit {
            for record in &mut records {
                record.trim_history(limit);
            }
        }
        if changed {
            debug!(
                "record document reloaded (path={}, records={})",
                self.path.display(),
                records.len()
            );
        }
        cache.records = records;
        cache.stamp = current;
        Ok(())
    }

    /// Cached records, reloaded first when the document changed.
    fn snapshot(&self) -> Result<Vec<MedicationRecord>, StoreError> {
        let mut cache = self.cache.lock();
        self.refresh(&mut cache, false)?;
        Ok(cache.records.clone())
    }

    /// Apply a change to a copy of the records and commit it once persisted.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<MedicationRecord>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut cache = self.cache.lock();
        self.refresh(&mut cache, true)?;
        let mut next = cache.records.clone();
        let output = change(&mut next)?;
        let stamp = self.persist(&next)?;
        cache.records = next;
        cache.stamp = stamp;
        Ok(output)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    /// Insert or replace a record and rewrite the document.
    async fn put(&self, mut record: MedicationRecord) -> Result<(), StoreError> {
        record.validate()?;
        if let Some(limit) = self.history_limit {
            record.trim_history(limit);
        }
        debug!("storing record (id={}, name={})", record.id, record.name);
        self.mutate(|records| {
            upsert(records, record);
            Ok(())
        })
    }

    async fn get(&self, id: &RecordId) -> Result<Option<MedicationRecord>, StoreError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .find(|record| &record.id == id))
    }

    async fn get_all(&self) -> Result<Vec<MedicationRecord>, StoreError> {
        self.snapshot()
    }

    /// Remove a record and rewrite the document.
    async fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        let removed = self.mutate(|records| {
            let before = records.len();
            records.retain(|record| &record.id != id);
            Ok(records.len() != before)
        })?;
        if removed {
            info!("deleted record (id={})", id);
        } else {
            warn!("record not found for delete (id={})", id);
        }
        Ok(removed)
    }

    /// Replace a record's history, keeping every other field.
    async fn set_history(
        &self,
        id: &RecordId,
        mut history: Vec<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        history.sort();
        if let Some(limit) = self.history_limit {
            let excess = history.len().saturating_sub(limit);
            history.drain(..excess);
        }
        debug!("updating history (id={}, entries={})", id, history.len());
        self.mutate(|records| {
            let record = records
                .iter_mut()
                .find(|record| &record.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            record.history = history;
            Ok(())
        })
    }

    /// Remove every record.
    async fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.mutate(|records| {
            let count = records.len();
            records.clear();
            Ok(count)
        })?;
        info!("cleared record store (removed={})", removed);
        Ok(removed)
    }
}

/// Replace the record with the same id in place, or append it.
pub(crate) fn upsert(records: &mut Vec<MedicationRecord>, record: MedicationRecord) {
    match records.iter_mut().find(|existing| existing.id == record.id) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

/// Size and modification time of the document, `None` when it does not exist.
fn file_stamp(path: &Path) -> Result<Option<FileStamp>, StoreError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(FileStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Read and decode a record document; an empty file holds no records.
fn load_document(path: &Path) -> Result<(Vec<MedicationRecord>, LoadReport), StoreError> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok((Vec::new(), LoadReport::empty()));
    }
    let value: Value = serde_json::from_str(&contents)?;
    decode_document(value)
}
