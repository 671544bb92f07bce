//! Centralized path management for job state files.
//!
//! Every job keeps its seen-set in `<state dir>/<job name>.db`. This module
//! owns that convention: building the path for a job, creating the state
//! directory, and enumerating the jobs that already have state.
//!
//! # Examples
//!
//! ```rust
//! use deltafetch::services::PathManager;
//!
//! let manager = PathManager::new("/var/lib/crawler/deltafetch");
//! let path = manager.job_db_path("books").unwrap();
//! assert!(path.ends_with("books.db"));
//! ```

use crate::models::Job;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// File extension of job state files.
pub const STATE_FILE_EXTENSION: &str = "db";

/// Manages the state directory for deltafetch jobs.
#[derive(Debug, Clone)]
pub struct PathManager {
    /// Directory holding one state file per job.
    state_dir: PathBuf,
}

impl PathManager {
    /// Creates a `PathManager` rooted at `state_dir`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Returns the state directory.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Returns the state file path for a job.
    ///
    /// # Returns
    ///
    /// `{state_dir}/{job_name}.db`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the job name cannot be used as a
    /// file stem.
    pub fn job_db_path(&self, job_name: &str) -> Result<PathBuf> {
        Job::validate_name(job_name)?;
        Ok(self
            .state_dir
            .join(format!("{job_name}.{STATE_FILE_EXTENSION}")))
    }

    /// Ensures the state directory exists.
    ///
    /// Creates the directory and any necessary parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the directory cannot be
    /// created; without it no job state can be opened.
    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| Error::StorageUnavailable {
            path: self.state_dir.display().to_string(),
            cause: format!(
                "cannot create state directory: {e}. Please create manually with: mkdir -p {}",
                self.state_dir.display()
            ),
        })
    }

    /// Lists the names of jobs that have a state file, sorted.
    ///
    /// A missing state directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list_jobs(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::OperationFailed {
                    operation: "list_state_dir".to_string(),
                    cause: format!("{}: {e}", self.state_dir.display()),
                });
            },
        };

        let mut jobs: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == STATE_FILE_EXTENSION)
            })
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        jobs.sort();
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_db_path() {
        let manager = PathManager::new("/var/lib/deltafetch");
        assert_eq!(
            manager.job_db_path("alpha").unwrap(),
            Path::new("/var/lib/deltafetch/alpha.db")
        );
    }

    #[test]
    fn test_job_db_path_keeps_dots_in_name() {
        let manager = PathManager::new("/state");
        assert_eq!(
            manager.job_db_path("books.toscrape.com").unwrap(),
            Path::new("/state/books.toscrape.com.db")
        );
    }

    #[test]
    fn test_job_db_path_rejects_traversal() {
        let manager = PathManager::new("/state");
        assert!(matches!(
            manager.job_db_path("../etc/passwd"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ensure_state_dir() {
        let temp = tempfile::tempdir().unwrap();
        let manager = PathManager::new(temp.path().join("deeply").join("nested"));

        assert!(!manager.state_dir().exists());
        manager.ensure_state_dir().unwrap();
        assert!(manager.state_dir().is_dir());
        // Idempotent
        manager.ensure_state_dir().unwrap();
    }

    #[test]
    fn test_ensure_state_dir_fails_on_file() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let manager = PathManager::new(blocker.join("state"));
        assert!(matches!(
            manager.ensure_state_dir(),
            Err(Error::StorageUnavailable { .. })
        ));
    }

    #[test]
    fn test_list_jobs() {
        let temp = tempfile::tempdir().unwrap();
        let manager = PathManager::new(temp.path());
        std::fs::write(temp.path().join("beta.db"), b"").unwrap();
        std::fs::write(temp.path().join("alpha.db"), b"").unwrap();
        std::fs::write(temp.path().join("alpha.db-wal"), b"").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"").unwrap();

        assert_eq!(manager.list_jobs().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_list_jobs_missing_dir() {
        let manager = PathManager::new("/nonexistent/deltafetch/state");
        assert!(manager.list_jobs().unwrap().is_empty());
    }
}
