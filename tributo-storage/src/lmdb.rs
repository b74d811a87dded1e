//! LMDB-backed durable key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist the local mirror
//! across process restarts. Every `set`/`remove` commits its own write
//! transaction, so a value is durable as soon as the call returns.

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use tributo_core::StorageError;

use crate::store::KeyValueStore;

/// Error type for opening an LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        StorageError::Backend {
            reason: e.to_string(),
        }
    }
}

fn backend(e: heed::Error) -> StorageError {
    StorageError::Backend {
        reason: e.to_string(),
    }
}

/// LMDB-backed [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// use tributo_storage::{LmdbStore, LocalStore};
///
/// let store = LmdbStore::open("/var/lib/tributo/mirror", 64)?;
/// let local = LocalStore::new(store);
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Str>,
}

impl LmdbStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process;
        // the single-writer assumption of the mirror rules out concurrent opens.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "LMDB store opened");

        Ok(Self { env, db })
    }
}

impl KeyValueStore for LmdbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        let value = self.db.get(&rtxn, key).map_err(backend)?;
        Ok(value.map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        self.db.put(&mut wtxn, key, value).map_err(backend)?;
        wtxn.commit().map_err(backend)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        self.db.delete(&mut wtxn, key).map_err(backend)?;
        wtxn.commit().map_err(backend)
    }
}
