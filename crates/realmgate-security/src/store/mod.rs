//! Crash-safe, name-keyed record persistence
//!
//! Each store owns one file holding one record per line. Readers work on an
//! immutable snapshot of the record map; mutations are serialized, rewrite the
//! whole file to a temporary sibling, commit it with an atomic rename and only
//! then publish the new snapshot. A failed rename leaves both the file and the
//! published snapshot untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use realmgate_common::error::{Error, Result, StoreError};
use realmgate_common::metrics;

pub mod fs;
pub mod records;

pub use fs::{FileSystem, FileVersion, LocalFileSystem};
pub use records::{
    is_valid_name, GroupRecord, Membership, Record, RoleRecord, UserRecord, IS_SUSPENDED,
    PASSWORD_CHANGE_REQUIRED,
};

pub type UserStore = RecordStore<UserRecord>;
pub type RoleStore = RecordStore<RoleRecord>;
pub type GroupStore = RecordStore<GroupRecord>;

type Snapshot<R> = Arc<BTreeMap<String, R>>;

/// Records read from a file
#[derive(Debug)]
pub struct LoadedRecords<R> {
    pub records: BTreeMap<String, R>,
    /// One `CorruptRecordLine` per skipped line
    pub invalid: Vec<StoreError>,
    /// Version of the file observed before reading it, `None` if absent
    pub version: Option<FileVersion>,
}

/// Persistent map from name to record
pub struct RecordStore<R: Record> {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    records: RwLock<Snapshot<R>>,
    /// Serializes mutations and installs
    write_lock: Mutex<()>,
    loaded_version: Mutex<Option<FileVersion>>,
}

impl<R: Record> RecordStore<R> {
    /// Open the store, loading `path` if it exists.
    ///
    /// Malformed lines are logged and skipped; the open fails only when the
    /// file has content but not a single valid record.
    pub fn open(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            fs,
            records: RwLock::new(Arc::new(BTreeMap::new())),
            write_lock: Mutex::new(()),
            loaded_version: Mutex::new(None),
        };

        let loaded = store.read_file()?;
        if loaded.records.is_empty() {
            if let Some(first) = loaded.invalid.first() {
                return Err(first.clone().into());
            }
        }

        info!(
            "Loaded {} {} records from {:?} ({} skipped)",
            loaded.records.len(),
            R::KIND,
            store.path,
            loaded.invalid.len()
        );
        store.install(loaded.records, loaded.version);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_valid_name(name: &str) -> bool {
        is_valid_name(name)
    }

    fn snapshot(&self) -> Snapshot<R> {
        Arc::clone(&self.records.read())
    }

    pub fn find_by_name(&self, name: &str) -> Option<R> {
        self.snapshot().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Record names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// All records in name order
    pub fn all(&self) -> Vec<R> {
        self.snapshot().values().cloned().collect()
    }

    fn validate(record: &R) -> Result<()> {
        if !is_valid_name(record.name()) {
            return Err(Error::Validation(format!(
                "'{}' is not a valid {} name",
                record.name(),
                R::KIND
            )));
        }
        if let Some(bad) = record.nested_names().into_iter().find(|n| !is_valid_name(n)) {
            return Err(Error::Validation(format!(
                "{} '{}' holds invalid name '{}'",
                R::KIND,
                record.name(),
                bad
            )));
        }
        Ok(())
    }

    pub fn create(&self, record: R) -> Result<()> {
        Self::validate(&record)?;

        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        if current.contains_key(record.name()) {
            return Err(StoreError::NameAlreadyExists(record.name().to_string()).into());
        }

        let mut next = (*current).clone();
        next.insert(record.name().to_string(), record);
        self.commit(next)
    }

    /// Replace `expected` with `replacement` if `expected` is still exactly
    /// what is stored.
    pub fn update(&self, expected: &R, replacement: R) -> Result<()> {
        if expected.name() != replacement.name() {
            return Err(StoreError::NameMismatch {
                expected: expected.name().to_string(),
                actual: replacement.name().to_string(),
            }
            .into());
        }
        Self::validate(&replacement)?;

        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        if current.get(expected.name()) != Some(expected) {
            return Err(StoreError::ConcurrentModification(expected.name().to_string()).into());
        }

        let mut next = (*current).clone();
        next.insert(replacement.name().to_string(), replacement);
        self.commit(next)
    }

    /// Remove the record with `record`'s name. Returns false if there was none.
    pub fn delete(&self, record: &R) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        if !current.contains_key(record.name()) {
            return Ok(false);
        }

        let mut next = (*current).clone();
        next.remove(record.name());
        self.commit(next)?;
        Ok(true)
    }

    /// Persist `next` and publish it. Caller holds the write lock.
    fn commit(&self, next: BTreeMap<String, R>) -> Result<()> {
        self.write_file(&next)?;
        let version = self.fs.version(&self.path).ok();
        *self.loaded_version.lock() = version;
        metrics::record_store_write(R::KIND, next.len());
        *self.records.write() = Arc::new(next);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_file(&self, records: &BTreeMap<String, R>) -> Result<()> {
        let mut content = String::new();
        for record in records.values() {
            content.push_str(&record.to_line());
            content.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        let written = self
            .fs
            .write_all(&temp, content.as_bytes())
            .and_then(|()| self.fs.rename(&temp, &self.path));

        if let Err(e) = written {
            if self.fs.exists(&temp) {
                if let Err(cleanup) = self.fs.remove_file(&temp) {
                    warn!("Failed to remove temporary file {:?}: {}", temp, cleanup);
                }
            }
            return Err(e.into());
        }

        debug!("Wrote {} {} records to {:?}", records.len(), R::KIND, self.path);
        Ok(())
    }

    /// Read and parse the backing file without touching the published records
    pub fn read_file(&self) -> Result<LoadedRecords<R>> {
        if !self.fs.exists(&self.path) {
            return Ok(LoadedRecords {
                records: BTreeMap::new(),
                invalid: Vec::new(),
                version: None,
            });
        }

        let version = self.fs.version(&self.path)?;
        let content = self.fs.read_to_string(&self.path)?;

        let mut records = BTreeMap::new();
        let mut invalid = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let parsed = R::parse_line(line).and_then(|record| {
                if records.contains_key(record.name()) {
                    Err(format!("duplicate {} name '{}'", R::KIND, record.name()))
                } else {
                    Ok(record)
                }
            });

            match parsed {
                Ok(record) => {
                    records.insert(record.name().to_string(), record);
                }
                Err(reason) => {
                    warn!("Skipping invalid {} line {} in {:?}: {}", R::KIND, index + 1, self.path, reason);
                    metrics::record_corrupt_line(R::KIND);
                    invalid.push(StoreError::CorruptRecordLine {
                        path: self.path.clone(),
                        line: index + 1,
                        reason,
                    });
                }
            }
        }

        Ok(LoadedRecords {
            records,
            invalid,
            version: Some(version),
        })
    }

    /// Publish a freshly loaded record set, replacing the current one wholesale
    pub fn install(&self, records: BTreeMap<String, R>, version: Option<FileVersion>) {
        let _guard = self.write_lock.lock();
        self.publish(records, version);
    }

    fn publish(&self, records: BTreeMap<String, R>, version: Option<FileVersion>) {
        *self.records.write() = Arc::new(records);
        *self.loaded_version.lock() = version;
    }

    /// Block mutations until the returned guard is dropped or installs.
    ///
    /// A reload reads and installs through the guard so no write can commit
    /// between the read and the install.
    pub fn lock(&self) -> StoreLock<'_, R> {
        StoreLock {
            store: self,
            _guard: self.write_lock.lock(),
        }
    }

    /// Version of the file as last loaded or written by this store
    pub fn loaded_version(&self) -> Option<FileVersion> {
        *self.loaded_version.lock()
    }

    /// Current on-disk version, `None` if the file does not exist
    pub fn disk_version(&self) -> Result<Option<FileVersion>> {
        if !self.fs.exists(&self.path) {
            return Ok(None);
        }
        Ok(Some(self.fs.version(&self.path)?))
    }
}

/// Exclusive access to a store for a read-then-install cycle
pub struct StoreLock<'a, R: Record> {
    store: &'a RecordStore<R>,
    _guard: MutexGuard<'a, ()>,
}

impl<R: Record> StoreLock<'_, R> {
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn read_file(&self) -> Result<LoadedRecords<R>> {
        self.store.read_file()
    }

    pub fn install(self, loaded: LoadedRecords<R>) {
        self.store.publish(loaded.records, loaded.version);
    }
}

impl<R: Record + Membership> RecordStore<R> {
    /// Names of all records listing `member`
    pub fn names_containing(&self, member: &str) -> BTreeSet<String> {
        self.snapshot()
            .values()
            .filter(|record| record.members().contains(member))
            .map(|record| record.name().to_string())
            .collect()
    }
}
