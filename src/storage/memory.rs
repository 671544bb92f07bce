//! In-memory key store.
//!
//! Holds the seen-set in a `HashMap` for the lifetime of the process. Nothing
//! is written to disk, so history does not carry over between runs. Used for
//! dry runs and tests.

use crate::Result;
use crate::storage::sqlite::acquire_lock;
use crate::storage::traits::KeyStore;
use std::collections::HashMap;
use std::sync::Mutex;

/// Non-durable key store.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(acquire_lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        acquire_lock(&self.entries).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(acquire_lock(&self.entries).len())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_overwrite() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.get(b"k").unwrap(), None);

        store.put(b"k", b"1").unwrap();
        store.put(b"k", b"2").unwrap();

        assert_eq!(store.get(b"k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_close() {
        let store: Box<dyn KeyStore> = Box::new(MemoryKeyStore::new());
        store.put(b"k", b"1").unwrap();
        assert!(store.close().is_ok());
    }
}
