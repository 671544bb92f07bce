//! Key-value store trait backing a job's seen-set.

use crate::Result;

/// A durable mapping from opaque byte keys to opaque byte values.
///
/// One store holds the state of exactly one job. Implementations serialize
/// access internally, so `get` and `put` may be called from several threads;
/// at most one of them touches the underlying file at any instant.
///
/// Opening is backend specific (see [`crate::storage::open_store`]). Every
/// backend must honour the same open contract: a reset discards existing
/// contents, and an existing file that cannot be opened is deleted and
/// recreated instead of failing.
pub trait KeyStore: Send + Sync {
    /// Returns the backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Looks up the value stored under `key`.
    ///
    /// Absence is `Ok(None)`, not an error.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::WriteFailed`] if the write does not land.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns the number of keys in the store.
    fn len(&self) -> Result<usize>;

    /// Returns true if the store holds no keys.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Checks whether `key` is present.
    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Flushes and releases the store.
    ///
    /// Consumes the store; callers must drain in-flight operations first.
    fn close(self: Box<Self>) -> Result<()>;
}
