use std::path::PathBuf;

use ulinkme_core::{EventKind, EventMask};

use crate::models::LogLevel;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "ULINKME_CONFIG";

/// Non-empty value of `name`, as a path.
pub fn path_var(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

/// Parse a log level name, accepting the usual aliases (`warning`,
/// `critical`) case-insensitively.
pub fn parse_level(raw: &str) -> Option<LogLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" | "critical" | "fatal" => Some(LogLevel::Error),
        _ => None,
    }
}

/// Build an event mask from configured names. Unrecognised names are
/// returned separately so the caller can report them.
pub fn parse_events<I, S>(names: I) -> (EventMask, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut mask = EventMask::none();
    let mut unknown = Vec::new();
    for name in names {
        match name.as_ref().parse::<EventKind>() {
            Ok(kind) => {
                mask.insert(kind);
            }
            Err(err) => unknown.push(err.0),
        }
    }
    (mask, unknown)
}
