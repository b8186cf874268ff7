//! Logging setup
//!
//! Console output is always on, compact or JSON. A log file can be added
//! for unattended runs; it is written through a non-blocking appender whose
//! guard the caller keeps alive.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "PROXIMITY_GLITCH_LOG";
/// Environment variable selecting the console format ("json")
pub const LOG_FORMAT_ENV: &str = "PROXIMITY_GLITCH_LOG_FORMAT";
/// Environment variable naming a log file to write alongside the console
pub const LOG_FILE_ENV: &str = "PROXIMITY_GLITCH_LOG_FILE";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Also write plain-text logs here
    pub file_path: Option<PathBuf>,
    /// JSON lines on the console instead of compact text
    pub json_format: bool,
    /// Filter used when no environment filter is set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Defaults overridden by `PROXIMITY_GLITCH_LOG_FORMAT` and `PROXIMITY_GLITCH_LOG_FILE`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.json_format = format.eq_ignore_ascii_case("json");
        }
        if let Some(path) = std::env::var_os(LOG_FILE_ENV).filter(|p| !p.is_empty()) {
            config.file_path = Some(PathBuf::from(path));
        }
        config
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let json_console = config
        .json_format
        .then(|| fmt::layer().json().with_target(true).with_thread_ids(true));
    let compact_console = (!config.json_format).then(|| fmt::layer().with_target(true).compact());

    let (file_layer, guard) = match &config.file_path {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_console)
        .with(compact_console)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        json = config.json_format,
        file = ?config.file_path,
        "Logging initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.file_path.is_none());
        assert!(!config.json_format);
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_file_logging_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installation.log");
        let config = LogConfig {
            file_path: Some(path.clone()),
            ..Default::default()
        };

        let guard = init_logging(&config).unwrap();
        assert!(guard.is_some());
        assert!(path.exists());
    }
}
