//! Connection handling for the `SQLite` key store.
//!
//! Mutex handling with poison recovery, connection pragmas, and removal of a
//! database together with its WAL side files.

use crate::{Error, Result};
use rusqlite::Connection;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Suffixes of the side files `SQLite` keeps next to a WAL-mode database.
const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. This prevents cascading
/// failures when one operation panics.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("deltafetch_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for the seen-set workload.
///
/// # Configuration Applied
///
/// - **WAL mode**: a crash mid-write leaves the last committed state readable
/// - **NORMAL synchronous**: durable across process crashes, cheap per `put`
/// - **`busy_timeout`**: waits up to 5 seconds on a lock held elsewhere
///
/// Pragma failures are ignored here. A file that is not a database fails on
/// the first real statement instead, which is where open-time recovery hooks in.
pub fn configure_connection(conn: &Connection) {
    // journal_mode returns a row, so pragma_update is used rather than execute_batch
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
}

/// Opens a connection to the database at `path`, creating the file if needed.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| Error::OperationFailed {
        operation: "open_sqlite".to_string(),
        cause: e.to_string(),
    })?;
    configure_connection(&conn);
    Ok(conn)
}

/// Returns the path of a side file such as `alpha.db-wal`.
fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Deletes a database file and its WAL side files.
///
/// Missing files are not an error.
pub fn remove_database_files(path: &Path) -> io::Result<()> {
    let files = std::iter::once(path.to_path_buf())
        .chain(SIDE_FILE_SUFFIXES.iter().map(|suffix| side_file(path, suffix)));
    for file in files {
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::debug!(path = %file.display(), "Removed database file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_success() {
        let mutex = Mutex::new(42);
        let guard = acquire_lock(&mutex);
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let mutex_clone = Arc::clone(&mutex);
            let handle = thread::spawn(move || {
                let mut guard = acquire_lock(&mutex_clone);
                *guard += 1;
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let guard = acquire_lock(&mutex);
        assert_eq!(*guard, 10);
    }

    #[test]
    fn test_acquire_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(7));
        let mutex_clone = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = mutex_clone.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 7);
    }

    #[test]
    fn test_configure_connection() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_connection(&dir.path().join("pragmas.db")).unwrap();

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1, "Expected NORMAL synchronous mode (1)");

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);
    }

    #[test]
    fn test_side_file_appends_suffix() {
        let path = Path::new("/var/lib/deltafetch/alpha.db");
        assert_eq!(
            side_file(path, "-wal"),
            PathBuf::from("/var/lib/deltafetch/alpha.db-wal")
        );
    }

    #[test]
    fn test_remove_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpha.db");
        std::fs::write(&path, b"db").unwrap();
        std::fs::write(side_file(&path, "-wal"), b"wal").unwrap();

        remove_database_files(&path).unwrap();

        assert!(!path.exists());
        assert!(!side_file(&path, "-wal").exists());
        // Second call finds nothing to remove
        remove_database_files(&path).unwrap();
    }
}
