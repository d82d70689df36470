//! Persistent record store
//!
//! Every record is kept as a redundant primary/backup pair. Each copy starts
//! with a magic header; a copy without it is treated as corrupt. Writes are
//! serialized by a store-wide critical section so a reader never observes a
//! half-applied pair.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use warden_core::{DeviceRecord, KeyfobTable, RetryRecord, UserConfig};

use crate::error::{DaemonError, Result};

/// Header prefixed to every persisted copy
const MAGIC: &[u8] = b"WRDN1\n";

/// A persisted record type
pub trait Record: Serialize + DeserializeOwned {
    /// Record name in the store
    const NAME: &'static str;
}

impl Record for RetryRecord {
    const NAME: &'static str = "retry";
}

impl Record for UserConfig {
    const NAME: &'static str = "user_config";
}

impl Record for KeyfobTable {
    const NAME: &'static str = "keyfobs";
}

impl Record for DeviceRecord {
    const NAME: &'static str = "device";
}

/// Raw record storage. `Ok(None)` means the record does not exist.
pub trait Storage: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// File-backed storage with primary/backup copies
pub struct FileStorage {
    root: PathBuf,
    critical: Mutex<()>,
}

impl FileStorage {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            critical: Mutex::new(()),
        })
    }

    fn primary_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.rec", name))
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.bak", name))
    }

    fn read_copy(path: &Path) -> Result<Option<Vec<u8>>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        match data.strip_prefix(MAGIC) {
            Some(body) => Ok(Some(body.to_vec())),
            None => {
                warn!("Record copy {:?} failed its header check", path);
                Ok(None)
            }
        }
    }

    fn write_copy(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let mut data = Vec::with_capacity(MAGIC.len() + bytes.len());
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(bytes);
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.critical
            .lock()
            .map_err(|_| DaemonError::Storage("store lock poisoned".to_string()))
    }
}

impl Storage for FileStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock()?;
        let primary = self.primary_path(name);
        let backup = self.backup_path(name);

        if let Some(body) = Self::read_copy(&primary)? {
            return Ok(Some(body));
        }
        if let Some(body) = Self::read_copy(&backup)? {
            warn!("Record {} recovered from backup copy", name);
            return Ok(Some(body));
        }
        if primary.exists() || backup.exists() {
            return Err(DaemonError::Storage(format!(
                "both copies of record {} are corrupt",
                name
            )));
        }
        Ok(None)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let _guard = self.lock()?;
        Self::write_copy(&self.primary_path(name), bytes)?;
        Self::write_copy(&self.backup_path(name), bytes)?;
        debug!("Wrote record {} ({} bytes)", name, bytes.len());
        Ok(())
    }
}

/// In-memory storage with injectable faults
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Remove a record
    pub fn remove(&self, name: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(name);
        }
    }
}

impl Storage for MemoryStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DaemonError::Storage(format!("injected read fault: {}", name)));
        }
        let records = self
            .records
            .lock()
            .map_err(|_| DaemonError::Storage("store lock poisoned".to_string()))?;
        Ok(records.get(name).cloned())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DaemonError::Storage(format!("injected write fault: {}", name)));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| DaemonError::Storage("store lock poisoned".to_string()))?;
        records.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Typed access to persisted records
#[derive(Clone)]
pub struct Records {
    storage: Arc<dyn Storage>,
}

impl Records {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Read a record, `None` if it was never written
    pub fn read<R: Record>(&self) -> Result<Option<R>> {
        match self.storage.read(R::NAME)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a record that must exist
    pub fn read_required<R: Record>(&self) -> Result<R> {
        self.read()?.ok_or(DaemonError::RecordNotFound(R::NAME))
    }

    /// Read a record, falling back to its default when it was never written
    pub fn read_or_default<R: Record + Default>(&self) -> Result<R> {
        Ok(self.read()?.unwrap_or_default())
    }

    pub fn write<R: Record>(&self, record: &R) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.storage.write(R::NAME, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let records = Records::new(Arc::new(FileStorage::open(temp_dir.path()).unwrap()));

        assert!(records.read::<RetryRecord>().unwrap().is_none());

        let mut retry = RetryRecord::default();
        retry.retry_count = 5;
        retry.wait_seconds = 120;
        records.write(&retry).unwrap();

        assert_eq!(records.read::<RetryRecord>().unwrap(), Some(retry));
    }

    #[test]
    fn test_file_falls_back_to_backup() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).unwrap();
        storage.write("retry", b"{}").unwrap();

        fs::write(temp_dir.path().join("retry.rec"), b"garbage").unwrap();
        assert_eq!(storage.read("retry").unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_file_both_copies_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).unwrap();
        storage.write("retry", b"{}").unwrap();

        fs::write(temp_dir.path().join("retry.rec"), b"garbage").unwrap();
        fs::write(temp_dir.path().join("retry.bak"), b"garbage").unwrap();
        assert!(matches!(
            storage.read("retry"),
            Err(DaemonError::Storage(_))
        ));
    }

    #[test]
    fn test_memory_faults() {
        let storage = Arc::new(MemoryStorage::new());
        let records = Records::new(storage.clone());

        records.write(&UserConfig::default()).unwrap();
        storage.fail_reads(true);
        assert!(records.read::<UserConfig>().is_err());
        storage.fail_reads(false);
        assert_eq!(
            records.read_or_default::<UserConfig>().unwrap(),
            UserConfig::default()
        );

        storage.fail_writes(true);
        assert!(records.write(&KeyfobTable::new()).is_err());
    }

    #[test]
    fn test_required_record_missing() {
        let records = Records::new(Arc::new(MemoryStorage::new()));
        assert!(matches!(
            records.read_required::<DeviceRecord>(),
            Err(DaemonError::RecordNotFound("device"))
        ));
    }
}
