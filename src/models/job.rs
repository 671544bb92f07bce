//! Job identity and per-run options.

use crate::{Error, Result};

/// A named crawl job.
///
/// The name scopes the seen-set: each job owns exactly one state file named
/// after it, so names double as file stems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Job name.
    pub name: String,
    /// Per-run reset override.
    ///
    /// Has the same effect as the persistent reset option for this run only.
    pub reset: bool,
}

impl Job {
    /// Creates a job with no per-run reset.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reset: false,
        }
    }

    /// Builder method to set the per-run reset override.
    #[must_use]
    pub const fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Validates the job name for use as a state file stem.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the name is empty, contains a path
    /// separator or NUL byte, or is a relative path component.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("job name must not be empty".to_string()));
        }
        if name == "." || name == ".." {
            return Err(Error::InvalidInput(format!(
                "job name '{name}' is not a valid file name"
            )));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(Error::InvalidInput(format!(
                "job name '{name}' must not contain path separators"
            )));
        }
        Ok(())
    }
}
