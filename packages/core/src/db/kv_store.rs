//! Embedded ordered key-value store
//!
//! A thin synchronous wrapper around one RocksDB data directory. RocksDB takes
//! an exclusive `LOCK` file on open, so at most one `KvStore` per directory
//! may exist in the process; [`ConnectionManager`](crate::db::ConnectionManager)
//! is the only code that opens one.
//!
//! All methods block and must run on a blocking thread.

use crate::db::{GatewayError, GatewayResult};
use regex::Regex;
use rocksdb::{IteratorMode, Options, WriteOptions, DB};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub struct KvStore {
    identifier: String,
    path: PathBuf,
    db: DB,
    sync_writes: bool,
    /// Serializes check-then-write so `insert`/`update` are atomic per key
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("identifier", &self.identifier)
            .field("path", &self.path)
            .finish()
    }
}

impl KvStore {
    /// Open (creating if needed) the data directory at `path`
    ///
    /// Fails with `EngineUnavailable` when the directory is locked by another
    /// process or cannot be opened.
    pub fn open(identifier: &str, path: &Path, sync_writes: bool) -> GatewayResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| {
            GatewayError::engine_unavailable(format!(
                "failed to open embedded store '{}': {}",
                identifier, e
            ))
        })?;

        debug!("📂 Opened embedded store '{}' at {}", identifier, path.display());

        Ok(Self {
            identifier: identifier.to_string(),
            path: path.to_path_buf(),
            db,
            sync_writes,
            write_lock: Mutex::new(()),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value stored under `key`, `NotFound` if absent
    pub fn get(&self, key: &str) -> GatewayResult<Vec<u8>> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| self.storage_error(e))?
            .ok_or_else(|| GatewayError::not_found(format!("key not found: {}", key)))
    }

    /// Create `key`; `Conflict` if it already exists, leaving the old value intact
    pub fn insert(&self, key: &str, value: &[u8]) -> GatewayResult<()> {
        let _guard = self.lock_writes();
        if self.contains(key)? {
            return Err(GatewayError::conflict(format!("key exists: {}", key)));
        }
        self.write(key, value)
    }

    /// Replace the value of an existing `key`; `NotFound` if absent
    pub fn update(&self, key: &str, value: &[u8]) -> GatewayResult<()> {
        let _guard = self.lock_writes();
        if !self.contains(key)? {
            return Err(GatewayError::not_found(format!("key not found: {}", key)));
        }
        self.write(key, value)
    }

    /// Remove `key`; succeeds whether or not it existed
    pub fn delete(&self, key: &str) -> GatewayResult<()> {
        let _guard = self.lock_writes();
        self.db
            .delete_opt(key.as_bytes(), &self.write_options())
            .map_err(|e| self.storage_error(e))
    }

    /// All entries whose key matches `pattern`, in key byte order
    pub fn scan(&self, pattern: &Regex) -> GatewayResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item.map_err(|e| self.storage_error(e))?;
            let key = String::from_utf8_lossy(&key);
            if pattern.is_match(&key) {
                entries.push((key.into_owned(), value.into_vec()));
            }
        }
        Ok(entries)
    }

    fn contains(&self, key: &str) -> GatewayResult<bool> {
        self.db
            .get_pinned(key.as_bytes())
            .map(|value| value.is_some())
            .map_err(|e| self.storage_error(e))
    }

    fn write(&self, key: &str, value: &[u8]) -> GatewayResult<()> {
        self.db
            .put_opt(key.as_bytes(), value, &self.write_options())
            .map_err(|e| self.storage_error(e))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is (), so a poisoned lock carries no broken state
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn storage_error(&self, err: rocksdb::Error) -> GatewayError {
        GatewayError::engine_unavailable(format!(
            "embedded store '{}' failed: {}",
            self.identifier, err
        ))
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        debug!("📁 Closing embedded store '{}'", self.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ErrorKind;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, KvStore) {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open("t", &dir.path().join("t"), false).unwrap();
        (dir, store)
    }

    #[test]
    fn test_insert_conflict_keeps_value() {
        let (_dir, store) = open_temp();
        store.insert("k", b"one").unwrap();

        let err = store.insert("k", b"two").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.get("k").unwrap(), b"one");
    }

    #[test]
    fn test_update_missing_creates_nothing() {
        let (_dir, store) = open_temp();
        let err = store.update("ghost", b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(store.get("ghost").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = open_temp();
        store.delete("never").unwrap();
        store.insert("k", b"v").unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_scan_filters_in_key_order() {
        let (_dir, store) = open_temp();
        store.insert("user:2", b"b").unwrap();
        store.insert("order:1", b"o").unwrap();
        store.insert("user:1", b"a").unwrap();

        let entries = store.scan(&Regex::new("^user:").unwrap()).unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["user:1", "user:2"]);
    }

    #[test]
    fn test_second_open_of_same_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked");
        let _first = KvStore::open("locked", &path, false).unwrap();

        let err = KvStore::open("locked", &path, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    }
}
