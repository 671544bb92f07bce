//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;

/// Environment variable holding a filter directive for deltafetch logs.
///
/// Takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "DELTAFETCH_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive.
    pub filter: String,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging config from config-file settings and the process
    /// environment.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        Self::from_settings_with(settings, verbose, |name| std::env::var(name).ok())
    }

    /// Builds logging config, reading environment variables through `lookup`.
    ///
    /// The filter is the first of `DELTAFETCH_LOG`, `RUST_LOG`, the configured
    /// level, and finally `debug` or `info` depending on `verbose`.
    #[must_use]
    pub fn from_settings_with<F>(
        settings: Option<&LoggingSettings>,
        verbose: bool,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let filter = var(LOG_ENV)
            .or_else(|| var("RUST_LOG"))
            .or_else(|| settings.and_then(|s| s.level.clone()))
            .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());

        let format = settings
            .and_then(|s| s.format.as_deref())
            .and_then(|name| {
                let parsed = LogFormat::parse(name);
                if parsed.is_none() {
                    tracing::warn!(format = name, "Unknown log format, using pretty");
                }
                parsed
            })
            .unwrap_or_default();

        Self {
            format,
            filter,
            file: settings.and_then(|s| s.file.clone()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: "info".to_string(),
            file: None,
        }
    }
}
