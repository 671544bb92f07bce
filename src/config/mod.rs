//! Configuration management.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `DELTAFETCH_*` environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Type | Default | Description |
//! |----------|------|---------|-------------|
//! | `DELTAFETCH_ENABLED` | bool | `false` | Install the filter at all |
//! | `DELTAFETCH_DIR` | path | `<user data dir>/deltafetch` | Directory holding one state file per job |
//! | `DELTAFETCH_RESET` | bool | `false` | Truncate job state at open |
//! | `DELTAFETCH_BACKEND` | string | `sqlite` | Store backend: `sqlite` or `memory` |
//!
//! # Example
//!
//! ```toml
//! enabled = true
//! dir = "/var/lib/crawler/deltafetch"
//! reset = false
//! backend = "sqlite"
//!
//! [logging]
//! format = "json"
//! level = "info"
//! ```

mod backend;

pub use backend::StoreBackend;

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application name used for config and data directories.
pub const APP_NAME: &str = "deltafetch";

/// Main configuration for deltafetch.
#[derive(Debug, Clone)]
pub struct DeltaFetchConfig {
    /// Whether the filter is installed. When false the output stream passes
    /// through unmodified.
    pub enabled: bool,
    /// Base directory under which one state file per job is kept.
    pub dir: PathBuf,
    /// Truncate each job's state file at open.
    pub reset: bool,
    /// Store backend.
    pub backend: StoreBackend,
    /// Logging settings from the config file.
    pub logging: LoggingSettings,
}

/// Logging section in config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Output format: `pretty` or `json`.
    pub format: Option<String>,
    /// Default filter directive, e.g. `info` or `deltafetch=debug`.
    pub level: Option<String>,
    /// Optional log file path; logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Enabled flag.
    pub enabled: Option<bool>,
    /// State directory.
    pub dir: Option<String>,
    /// Reset flag.
    pub reset: Option<bool>,
    /// Backend name.
    pub backend: Option<StoreBackend>,
    /// Logging configuration.
    pub logging: Option<LoggingSettings>,
}

impl Default for DeltaFetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_state_dir(),
            reset: false,
            backend: StoreBackend::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Returns the platform data directory for deltafetch state.
///
/// Falls back to a directory under the system temp dir if the platform data
/// directory cannot be resolved.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || {
            tracing::warn!("Failed to resolve user data dir; falling back to temp dir");
            std::env::temp_dir().join(APP_NAME)
        },
        |dirs| dirs.data_local_dir().join(APP_NAME),
    )
}

impl DeltaFetchConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// environment override has an invalid value.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml_str(&contents)?.with_env_overrides()
    }

    /// Loads configuration from the default location, then applies
    /// environment overrides.
    ///
    /// Checks `<platform config dir>/deltafetch/config.toml`. A missing or
    /// unreadable file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment override has an invalid value.
    pub fn load_default() -> Result<Self> {
        let from_file = directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join(APP_NAME).join("config.toml"))
            .filter(|path| path.exists())
            .and_then(|path| {
                std::fs::read_to_string(&path)
                    .map_err(|e| Error::OperationFailed {
                        operation: "read_config_file".to_string(),
                        cause: e.to_string(),
                    })
                    .and_then(|contents| Self::from_toml_str(&contents))
                    .inspect_err(|e| {
                        tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    })
                    .ok()
            });

        from_file.unwrap_or_default().with_env_overrides()
    }

    /// Parses a TOML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML for [`ConfigFile`].
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Converts a `ConfigFile` to `DeltaFetchConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(enabled) = file.enabled {
            config.enabled = enabled;
        }
        if let Some(dir) = file.dir {
            config.dir = PathBuf::from(dir);
        }
        if let Some(reset) = file.reset {
            config.reset = reset;
        }
        if let Some(backend) = file.backend {
            config.backend = backend;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        config
    }

    /// Applies `DELTAFETCH_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a variable holds an unparseable value.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies `DELTAFETCH_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a variable holds an unparseable value.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("DELTAFETCH_ENABLED") {
            self.enabled = parse_bool("DELTAFETCH_ENABLED", &v)?;
        }
        if let Some(v) = var("DELTAFETCH_DIR") {
            self.dir = PathBuf::from(v);
        }
        if let Some(v) = var("DELTAFETCH_RESET") {
            self.reset = parse_bool("DELTAFETCH_RESET", &v)?;
        }
        if let Some(v) = var("DELTAFETCH_BACKEND") {
            self.backend = StoreBackend::parse(&v).ok_or_else(|| {
                Error::InvalidInput(format!("DELTAFETCH_BACKEND: unknown backend '{v}'"))
            })?;
        }

        Ok(self)
    }

    /// Sets the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Sets the reset flag.
    #[must_use]
    pub const fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Sets the store backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: StoreBackend) -> Self {
        self.backend = backend;
        self
    }
}

/// Parses a boolean environment value.
fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidInput(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}
