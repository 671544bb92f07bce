//! Store backend selection.

use serde::Deserialize;
use std::fmt;

/// Key store backend, resolved once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One `SQLite` database file per job.
    #[default]
    Sqlite,
    /// Process-local map; history does not survive the process.
    Memory,
}

impl StoreBackend {
    /// Parses a backend name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }

    /// Returns true if state written with this backend survives the process.
    #[must_use]
    pub const fn is_durable(self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
