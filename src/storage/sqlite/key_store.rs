//! `SQLite`-backed key store.
//!
//! One database file per job holds a single `seen` table. The file is opened
//! with recovery: if the existing file cannot be opened as a seen-set database
//! it is deleted and recreated empty, so a damaged state file costs the job its
//! history rather than the whole run. [`SqliteKeyStore::open_existing`] is the
//! read-only counterpart for inspection, and never touches the file.

use super::connection::{acquire_lock, open_connection, remove_database_files};
use super::metrics::{record_operation_metrics, status_label};
use crate::storage::traits::KeyStore;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::instrument;

/// Schema version stored in `PRAGMA user_version`.
///
/// A database carrying a different non-zero version was written by an
/// incompatible build and is treated like a corrupt file.
pub const SCHEMA_VERSION: i32 = 1;

const BACKEND: &str = "sqlite";

/// `SQLite` key store for one job.
///
/// # Concurrency Model
///
/// The connection sits behind a `Mutex`, so at most one `get` or `put` runs
/// against the file at a time. The store itself assumes a single writer
/// process per file; two jobs must never share a path.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE seen (key BLOB PRIMARY KEY NOT NULL, value BLOB NOT NULL) WITHOUT ROWID
/// ```
pub struct SqliteKeyStore {
    /// Connection to the `SQLite` database.
    ///
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database file.
    db_path: PathBuf,
}

impl SqliteKeyStore {
    /// Opens or creates the store at `path`.
    ///
    /// With `reset` set, existing contents are discarded. If the existing file
    /// cannot be opened (corruption, foreign schema, partial write), it is
    /// deleted together with its WAL files and a fresh database is created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] only if the fresh create fails too.
    #[instrument(skip_all, fields(operation = "open", backend = BACKEND, path = %path.as_ref().display(), reset = reset))]
    pub fn open(path: impl AsRef<Path>, reset: bool) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let start = Instant::now();

        let result = Self::try_open(&db_path, reset).or_else(|first| {
            tracing::warn!(
                path = %db_path.display(),
                error = %first,
                "Failed to open seen-set database, trying to recreate it"
            );
            metrics::counter!("deltafetch_store_recreated_total").increment(1);
            Self::recreate(&db_path)
        });

        record_operation_metrics(BACKEND, "open", start, status_label(&result));
        result
    }

    /// Opens an existing store read-only, without recovery.
    ///
    /// The file is checked the same way [`Self::open`] checks it, but a
    /// missing, corrupt or foreign file is reported instead of recreated.
    /// Writes through the returned store fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file cannot be opened or
    /// fails the schema or integrity check.
    #[instrument(skip_all, fields(operation = "open_existing", backend = BACKEND, path = %path.as_ref().display()))]
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_read_only".to_string(),
            cause: e.to_string(),
        })?;

        let version = read_schema_version(&conn)?;
        if version != SCHEMA_VERSION {
            return Err(Error::OperationFailed {
                operation: "check_schema_version".to_string(),
                cause: format!("found schema version {version}, expected {SCHEMA_VERSION}"),
            });
        }
        verify_integrity(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Deletes whatever is at `path` and creates an empty database.
    fn recreate(db_path: &Path) -> Result<Self> {
        let unavailable = |cause: String| Error::StorageUnavailable {
            path: db_path.display().to_string(),
            cause,
        };
        remove_database_files(db_path).map_err(|e| unavailable(e.to_string()))?;
        Self::try_open(db_path, false).map_err(|e| unavailable(e.to_string()))
    }

    /// Single open attempt without recovery.
    fn try_open(db_path: &Path, reset: bool) -> Result<Self> {
        let conn = open_connection(db_path)?;
        Self::initialize(&conn)?;
        if reset {
            conn.execute("DELETE FROM seen", [])
                .map_err(|e| Error::OperationFailed {
                    operation: "truncate_seen".to_string(),
                    cause: e.to_string(),
                })?;
            tracing::info!(path = %db_path.display(), "Seen-set reset");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    /// Verifies the schema version and page integrity, then creates the
    /// `seen` table.
    ///
    /// The version read is also the first statement to touch the file, so a
    /// file that is not a database fails here. Damage past the header only
    /// shows up in the integrity check.
    fn initialize(conn: &Connection) -> Result<()> {
        let version = read_schema_version(conn)?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(Error::OperationFailed {
                operation: "check_schema_version".to_string(),
                cause: format!("found schema version {version}, expected {SCHEMA_VERSION}"),
            });
        }
        verify_integrity(conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS seen (
                key BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            ) WITHOUT ROWID",
            [],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_seen_table".to_string(),
            cause: e.to_string(),
        })?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| Error::OperationFailed {
                operation: "write_schema_version".to_string(),
                cause: e.to_string(),
            })?;

        Ok(())
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn read_schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| Error::OperationFailed {
            operation: "read_schema_version".to_string(),
            cause: e.to_string(),
        })
}

/// Runs `PRAGMA quick_check`, which reads every page of the file.
///
/// A healthy database yields exactly one row, `ok`.
fn verify_integrity(conn: &Connection) -> Result<()> {
    let failed = |cause: String| Error::OperationFailed {
        operation: "quick_check".to_string(),
        cause,
    };

    let mut stmt = conn
        .prepare("PRAGMA quick_check")
        .map_err(|e| failed(e.to_string()))?;
    let problems = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| failed(e.to_string()))?;

    match problems.as_slice() {
        [only] if only == "ok" => Ok(()),
        _ => Err(failed(problems.join("; "))),
    }
}

impl KeyStore for SqliteKeyStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip_all, fields(operation = "get", backend = BACKEND, key_len = key.len()))]
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT value FROM seen WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| Error::OperationFailed {
                operation: "get_seen".to_string(),
                cause: e.to_string(),
            })
        };

        record_operation_metrics(BACKEND, "get", start, status_label(&result));
        result
    }

    #[instrument(skip_all, fields(operation = "put", backend = BACKEND, key_len = key.len()))]
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT OR REPLACE INTO seen (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
            .map_err(|e| Error::WriteFailed {
                cause: e.to_string(),
            })
        };

        record_operation_metrics(BACKEND, "put", start, status_label(&result));
        result
    }

    fn len(&self) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM seen", [], |row| row.get(0))
            .map_err(|e| Error::OperationFailed {
                operation: "count_seen".to_string(),
                cause: e.to_string(),
            })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    #[instrument(skip_all, fields(operation = "close", backend = BACKEND))]
    fn close(self: Box<Self>) -> Result<()> {
        let Self { conn, db_path } = *self;
        let conn = conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(path = %db_path.display(), "Closing seen-set database");
        conn.close().map_err(|(_, e)| Error::OperationFailed {
            operation: "close_sqlite".to_string(),
            cause: e.to_string(),
        })
    }
}
