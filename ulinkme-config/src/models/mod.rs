use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use ulinkme_core::{
    EventMask, LinkError, LinkRule, WatchConfig, resolve_root, roots_overlap,
};

use crate::util::parse_level;

pub mod sources;

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub metadata: ConfigMetadata,
    pub log: LogConfig,
    pub watch: WatchConfig,
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    /// File the configuration was read from; `None` for the built-in default.
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Directory receiving `ulinkme.log`; stderr when unset.
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    pub const FILE_NAME: &'static str = "ulinkme.log";

    pub fn file_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(Self::FILE_NAME))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level '{0}', expected one of: trace, debug, info, warning, error")]
pub struct ParseLogLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_level(raw).ok_or_else(|| ParseLogLevelError(raw.to_string()))
    }
}

/// A configured link, before its paths are checked against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub source: PathBuf,
    pub mirror: PathBuf,
    pub recursive: bool,
    pub events: EventMask,
}

impl LinkSpec {
    pub fn build(&self) -> Result<LinkRule, LinkError> {
        LinkRule::new(&self.source, &self.mirror, self.recursive, self.events.clone())
    }

    fn invalid(&self, index: usize, source: LinkError) -> InvalidLinkError {
        InvalidLinkError {
            index,
            source_root: self.source.clone(),
            mirror_root: self.mirror.clone(),
            source,
        }
    }
}

#[derive(Debug, Error)]
#[error("link #{index} ({source_root} -> {mirror_root}) is invalid: {source}")]
pub struct InvalidLinkError {
    pub index: usize,
    pub source_root: PathBuf,
    pub mirror_root: PathBuf,
    #[source]
    pub source: LinkError,
}

impl Config {
    pub fn config_path(&self) -> Option<&Path> {
        self.metadata.config_path.as_deref()
    }

    /// Validate every link against the filesystem, creating missing mirror
    /// roots. Roots shared between links are rejected before any mirror root
    /// is created; otherwise fails on the first invalid link.
    pub fn build_rules(&self) -> Result<Vec<LinkRule>, InvalidLinkError> {
        let roots: Vec<[PathBuf; 2]> = self
            .links
            .iter()
            .map(|spec| [resolve_root(&spec.source), resolve_root(&spec.mirror)])
            .collect();
        for (index, ours) in roots.iter().enumerate() {
            let overlap = roots[..index].iter().find_map(|theirs| {
                ours.iter()
                    .find(|mine| theirs.iter().any(|other| roots_overlap(mine, other)))
                    .map(|path| (path.clone(), theirs[0].clone()))
            });
            if let Some((path, existing)) = overlap {
                let err = LinkError::RuleOverlap { path, existing };
                return Err(self.links[index].invalid(index, err));
            }
        }

        self.links
            .iter()
            .enumerate()
            .map(|(index, spec)| spec.build().map_err(|err| spec.invalid(index, err)))
            .collect()
    }
}
