use std::fs::{self, File};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use ulinkme_config::{LogConfig, LogLevel};

/// Filter used when `RUST_LOG` is unset. The watcher backend stays at
/// `warn` or quieter regardless of the configured level.
pub fn default_directives(level: LogLevel) -> String {
    format!("{level},notify={}", level.max(LogLevel::Warn))
}

/// Install the global subscriber. Output goes to `<dir>/ulinkme.log`
/// (truncated) when a log directory is configured, stderr otherwise.
pub fn init(log: &LogConfig, level_override: Option<LogLevel>) -> anyhow::Result<()> {
    let level = level_override.unwrap_or(log.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let log_file = match log.file_path() {
        Some(path) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            }
            let file = File::create(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(file)
        }
        None => None,
    };

    let (stderr_layer, file_layer) = match log_file {
        Some(file) => (
            None,
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        ),
        None => (Some(fmt::layer().with_writer(std::io::stderr)), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_backend_is_capped_at_warn() {
        assert_eq!(default_directives(LogLevel::Debug), "debug,notify=warn");
        assert_eq!(default_directives(LogLevel::Error), "error,notify=error");
    }

    #[test]
    fn directives_parse_as_filters() {
        for level in [LogLevel::Trace, LogLevel::Info, LogLevel::Warn] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }
}
