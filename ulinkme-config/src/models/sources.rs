use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as written in a JSON or TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub log: FileLogConfig,
    #[serde(default)]
    pub watch: FileWatchConfig,
    #[serde(default)]
    pub links: Vec<FileLinkConfig>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(alias = "dir", skip_serializing_if = "Option::is_none")]
    pub logdir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
}

/// One `links` entry. `target` is the watched tree and `name` the mirror.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileLinkConfig {
    #[serde(alias = "source")]
    pub target: PathBuf,
    #[serde(alias = "mirror")]
    pub name: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub events: Vec<String>,
}
