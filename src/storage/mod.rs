//! Storage layer for job seen-sets.
//!
//! A job's state is a [`KeyStore`]: a byte-key to byte-value map with
//! recovering open semantics. The concrete backend is chosen once, from
//! configuration, when the store is opened.

// Allow significant_drop_tightening - holding the connection lock a statement
// longer than necessary has no measurable cost.
#![allow(clippy::significant_drop_tightening)]

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryKeyStore;
pub use sqlite::SqliteKeyStore;
pub use traits::KeyStore;

use crate::Result;
use crate::config::StoreBackend;
use std::path::Path;

/// Opens the store for one job with the configured backend.
///
/// `path` is ignored by the in-memory backend.
///
/// # Errors
///
/// Returns [`crate::Error::StorageUnavailable`] if the backend cannot provide
/// a usable store, even after recreating the state file.
pub fn open_store(backend: StoreBackend, path: &Path, reset: bool) -> Result<Box<dyn KeyStore>> {
    match backend {
        StoreBackend::Sqlite => Ok(Box::new(SqliteKeyStore::open(path, reset)?)),
        StoreBackend::Memory => Ok(Box::new(MemoryKeyStore::new())),
    }
}
