//! Configuration structures.
//!
//! Configuration is loaded from a TOML file; every section is optional and
//! falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result, SourcePosition};

/// Global kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Request dispatch configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Reload/reconfiguration configuration.
    #[serde(default)]
    pub reload: ReloadConfig,
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            let position = e.span().map(|span| {
                let (line, column) = line_column(content, span.start);
                SourcePosition::at(None, line, column)
            });
            Error::Configuration {
                message: format!("invalid config: {}", e.message()),
                position,
            }
        })
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|err| match err {
            Error::Configuration {
                message,
                position: Some(mut position),
            } => {
                position.source = Some(path.display().to_string());
                Error::configuration_at(message, position)
            }
            other => other,
        })
    }
}

fn line_column(content: &str, offset: usize) -> (usize, usize) {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Request dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Requests addressing deeper paths are rejected before the walk starts.
    pub max_path_segments: usize,

    /// Upper bound on action bodies executing concurrently on the worker pool.
    pub max_concurrent_actions: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_path_segments: 64,
            max_concurrent_actions: 64,
        }
    }
}

/// Reload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// How often the declaration watcher polls the source file.
    #[serde(with = "humantime_serde")]
    pub watch_interval: Duration,

    /// Transactions slower than this are logged at warn.
    #[serde(with = "humantime_serde")]
    pub slow_reload_threshold: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            watch_interval: Duration::from_secs(2),
            slow_reload_threshold: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.dispatch.max_path_segments, 64);
        assert_eq!(config.reload.watch_interval, Duration::from_secs(2));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [reload]
            watch_interval = "250ms"

            [dispatch]
            max_concurrent_actions = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.reload.watch_interval, Duration::from_millis(250));
        assert_eq!(config.reload.slow_reload_threshold, Duration::from_millis(500));
        assert_eq!(config.dispatch.max_concurrent_actions, 4);
        assert_eq!(config.dispatch.max_path_segments, 64);
    }

    #[test]
    fn test_invalid_toml_reports_position() {
        let err = Config::from_toml_str("[dispatch]\nmax_path_segments = [").unwrap_err();
        match err {
            Error::Configuration { position, .. } => {
                let position = position.expect("position");
                assert_eq!(position.line, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[observability]").unwrap();
        writeln!(file, "json_logs = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/nodehost.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
