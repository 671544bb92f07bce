//! # Deltafetch
//!
//! Persistent cross-run request deduplication for crawl pipelines.
//!
//! A crawl job that runs repeatedly usually re-discovers the same pages. Deltafetch
//! remembers which requests already produced items in earlier runs of the same job and
//! drops those requests from the output stream, so each run only fetches what is new.
//!
//! ## Features
//!
//! - One durable seen-set per job (`<dir>/<job>.db`), reopened across runs
//! - Corrupt or unreadable state files reset to empty instead of failing the job
//! - Explicit reset, both persistent (config) and per run
//! - Override keys to deduplicate by entity identity instead of request identity
//! - Fail-open filtering: storage errors never drop pipeline output
//!
//! ## Example
//!
//! ```rust,ignore
//! use deltafetch::{DedupFilter, DeltaFetchConfig, Job, JobLifecycle, OutputStage};
//!
//! let filter = DedupFilter::new(DeltaFetchConfig::load_default()?);
//! let job = Job::new("alpha");
//! filter.job_opened(&job)?;
//!
//! let forwarded = filter.process_output(&origin, outputs)?;
//!
//! filter.job_closed(&job)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{DeltaFetchConfig, StoreBackend};
pub use models::{DedupEvent, DedupEventKind, Fingerprint, Item, Job, Output, WorkUnit};
pub use services::{
    DedupFilter, Fingerprinter, JobLifecycle, OutputStage, Passthrough, PipelineStage,
    RequestFingerprinter, SeenSetPolicy, install,
};
pub use storage::{KeyStore, MemoryKeyStore, SqliteKeyStore};

/// Error type for deltafetch operations.
///
/// | Variant | Raised When | Fatal |
/// |---------|-------------|-------|
/// | `StorageUnavailable` | A state file cannot be opened, even after delete-and-recreate | Yes, unless dedup is disabled |
/// | `WriteFailed` | A `put` fails on an open store | No, filtering continues fail-open |
/// | `ContractViolation` | The filter is used before open or after close | Yes, programming error |
/// | `InvalidInput` | Bad job name, malformed config value or pipeline record | Depends on caller |
/// | `OperationFailed` | Reads and lookups on an open store, config and log file I/O | Depends on caller |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The seen-set store could not be opened or created.
    ///
    /// Raised only after the recreate-after-delete fallback has also failed.
    #[error("storage unavailable at '{path}': {cause}")]
    StorageUnavailable {
        /// Path of the state file.
        path: String,
        /// The underlying cause.
        cause: String,
    },

    /// A write to an open store failed.
    #[error("write failed: {cause}")]
    WriteFailed {
        /// The underlying cause.
        cause: String,
    },

    /// An operation was invoked outside the `Open` lifecycle state.
    ///
    /// This signals a bug in the surrounding engine and must not be retried.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns true if the error must abort the job.
    ///
    /// Write failures and lookup failures are absorbed by the filter; everything
    /// else reaching the engine is terminal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::ContractViolation(_)
        )
    }
}

/// Result type alias for deltafetch operations.
pub type Result<T> = std::result::Result<T, Error>;
