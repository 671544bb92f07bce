//! Seen-set policy for one job.
//!
//! Wraps a [`KeyStore`] with key derivation and timestamping. The policy
//! answers one question, "has this work unit already yielded a result?", and
//! records the answer when it becomes yes.
//!
//! # Stored Values
//!
//! Each key maps to the time its last result was seen, encoded as UTF-8
//! decimal seconds since the Unix epoch with microsecond precision
//! (`1700000000.250000`). Only the presence of a key drives filtering; the
//! value is there for inspection.

use crate::config::StoreBackend;
use crate::models::{Fingerprint, WorkUnit};
use crate::services::{Fingerprinter, PathManager, RequestFingerprinter};
use crate::storage::{KeyStore, SqliteKeyStore, open_store};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// Decides and records what one job has already seen.
pub struct SeenSetPolicy {
    /// Job name, for logs and events.
    job: Arc<str>,
    /// Backing store.
    store: Box<dyn KeyStore>,
    /// Default key derivation when no override key is set.
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl SeenSetPolicy {
    /// Opens the seen-set for `job_name` under `base_dir`.
    ///
    /// Creates `base_dir` if needed and opens `<base_dir>/<job_name>.db`
    /// with the chosen backend. Uses the [`RequestFingerprinter`]; swap it
    /// with [`Self::with_fingerprinter`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unusable job name and
    /// [`Error::StorageUnavailable`] if no store can be opened.
    #[instrument(skip_all, fields(job = job_name, reset = reset, backend = %backend))]
    pub fn configure(
        job_name: &str,
        base_dir: &Path,
        reset: bool,
        backend: StoreBackend,
    ) -> Result<Self> {
        let paths = PathManager::new(base_dir);
        let db_path = paths.job_db_path(job_name)?;
        if backend.is_durable() {
            paths.ensure_state_dir()?;
        }

        let store = open_store(backend, &db_path, reset)?;
        tracing::info!(
            job = job_name,
            path = %db_path.display(),
            backend = store.backend_name(),
            "Opened seen-set"
        );

        Ok(Self::with_store(
            job_name,
            store,
            Arc::new(RequestFingerprinter::new()),
        ))
    }

    /// Opens the durable seen-set of `job_name` read-only.
    ///
    /// Unlike [`Self::configure`] this never creates, resets or recreates
    /// the state file, so a damaged file is reported as an error and left
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unusable job name and
    /// [`Error::OperationFailed`] if the file is missing or unreadable.
    #[instrument(skip_all, fields(job = job_name))]
    pub fn inspect(job_name: &str, base_dir: &Path) -> Result<Self> {
        let db_path = PathManager::new(base_dir).job_db_path(job_name)?;
        let store = SqliteKeyStore::open_existing(&db_path)?;
        Ok(Self::with_store(
            job_name,
            Box::new(store),
            Arc::new(RequestFingerprinter::new()),
        ))
    }

    /// Creates a policy over an already opened store.
    #[must_use]
    pub fn with_store(
        job_name: impl Into<Arc<str>>,
        store: Box<dyn KeyStore>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        Self {
            job: job_name.into(),
            store,
            fingerprinter,
        }
    }

    /// Replaces the fingerprinter.
    #[must_use]
    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Returns the job name.
    #[must_use]
    pub fn job(&self) -> &Arc<str> {
        &self.job
    }

    /// Returns the seen-set key of `unit`.
    ///
    /// The override key wins when present; otherwise the fingerprinter
    /// decides.
    #[must_use]
    pub fn derive_key(&self, unit: &WorkUnit) -> Fingerprint {
        unit.override_key()
            .unwrap_or_else(|| self.fingerprinter.fingerprint(unit))
    }

    /// Returns true if `unit` already yielded a result.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub fn has_seen(&self, unit: &WorkUnit) -> Result<bool> {
        self.has_seen_key(&self.derive_key(unit))
    }

    /// Returns true if `key` is in the seen-set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub fn has_seen_key(&self, key: &Fingerprint) -> Result<bool> {
        self.store.contains(key.as_bytes())
    }

    /// Records that `origin` yielded a result at `seen_at`.
    ///
    /// Recording an already seen unit overwrites its timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the store rejects the write.
    pub fn record_seen(&self, origin: &WorkUnit, seen_at: DateTime<Utc>) -> Result<Fingerprint> {
        let key = self.derive_key(origin);
        self.store
            .put(key.as_bytes(), encode_timestamp(seen_at).as_bytes())?;
        Ok(key)
    }

    /// Returns when `unit` last yielded a result, if ever.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or the stored value is not a
    /// timestamp.
    pub fn last_seen(&self, unit: &WorkUnit) -> Result<Option<DateTime<Utc>>> {
        self.store
            .get(self.derive_key(unit).as_bytes())?
            .map(|value| decode_timestamp(&value))
            .transpose()
    }

    /// Returns the number of keys recorded for this job.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be counted.
    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    /// Returns true if nothing has been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be counted.
    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// Closes the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to flush.
    pub fn close(self) -> Result<()> {
        tracing::debug!(job = %self.job, "Closing seen-set");
        self.store.close()
    }
}

/// Encodes a timestamp as decimal epoch seconds.
#[must_use]
pub fn encode_timestamp(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

/// Decodes a value written by [`encode_timestamp`].
///
/// A value without a fractional part is accepted as whole seconds.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the value is not a timestamp.
pub fn decode_timestamp(value: &[u8]) -> Result<DateTime<Utc>> {
    let invalid = || {
        Error::InvalidInput(format!(
            "invalid timestamp '{}'",
            String::from_utf8_lossy(value)
        ))
    };

    let text = std::str::from_utf8(value).map_err(|_| invalid())?;
    let (secs, frac) = text.split_once('.').unwrap_or((text, ""));
    let secs: i64 = secs.parse().map_err(|_| invalid())?;
    let micros: u32 = if frac.is_empty() {
        0
    } else if frac.len() <= 6 && frac.bytes().all(|b| b.is_ascii_digit()) {
        // Right-pad so "25" reads as 250000 micros
        format!("{frac:0<6}").parse().map_err(|_| invalid())?
    } else {
        return Err(invalid());
    };

    DateTime::from_timestamp(secs, micros * 1_000).ok_or_else(invalid)
}
