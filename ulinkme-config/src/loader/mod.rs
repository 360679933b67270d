use std::{
    fs,
    path::{Path, PathBuf},
};

use ulinkme_core::WatchConfig;

use crate::{
    models::{
        Config, ConfigMetadata, LinkSpec, LogConfig,
        sources::{FileConfig, FileLinkConfig},
    },
    util::{CONFIG_ENV_VAR, parse_events, parse_level, path_var},
    validation::ConfigWarnings,
};

pub mod error;

use error::ConfigLoadError;

/// Candidates tried, relative to the search root, when no path is given.
pub const DEFAULT_CONFIG_LOCATIONS: [&str; 4] = [
    "ulinkme.toml",
    "ulinkme.json",
    "config/ulinkme.toml",
    "config/ulinkme.json",
];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    /// Directory the default locations are resolved against; the working
    /// directory when unset.
    pub search_root: Option<PathBuf>,
}

/// Configuration taken from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: path_var(CONFIG_ENV_VAR),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
    env: Option<EnvConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options, env: None }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_search_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.options.search_root = Some(root.into());
        self
    }

    /// Use `env` instead of reading the process environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env = self.env.clone().unwrap_or_else(EnvConfig::gather);
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file_config, config_path);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(|candidate| self.search_path(candidate))
                .find(|candidate| candidate.is_file());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
            path: path.clone(),
            source: err,
        })?;
        let file_config = parse_file_config(&path, &contents)?;
        Ok((Some(file_config), Some(path)))
    }

    fn search_path(&self, candidate: &str) -> PathBuf {
        match &self.options.search_root {
            Some(root) => root.join(candidate),
            None => PathBuf::from(candidate),
        }
    }
}

/// Parse by extension: `.json` and `.toml` directly, anything else as TOML
/// first and JSON second.
pub fn parse_file_config(path: &Path, contents: &str) -> Result<FileConfig, ConfigLoadError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => serde_json::from_str(contents).map_err(|err| ConfigLoadError::Json {
            path: path.to_path_buf(),
            source: err,
        }),
        Some("toml") | Some("tml") => {
            toml::from_str(contents).map_err(|err| ConfigLoadError::Toml {
                path: path.to_path_buf(),
                source: err,
            })
        }
        _ => toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| ConfigLoadError::UnknownFormat {
                path: path.to_path_buf(),
                toml_error: toml_err.to_string(),
                json_error: json_err.to_string(),
            })
        }),
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    config_path: Option<PathBuf>,
) -> (Config, ConfigWarnings) {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No configuration file found; running with no links",
            format!(
                "Pass a config path or set {CONFIG_ENV_VAR}; searched {}",
                DEFAULT_CONFIG_LOCATIONS.join(", ")
            ),
        );
    }

    let FileConfig {
        log: file_log,
        watch: file_watch,
        links: file_links,
    } = file_config.unwrap_or_default();

    let level = match file_log.level.as_deref() {
        None => Default::default(),
        Some(raw) => parse_level(raw).unwrap_or_else(|| {
            warnings.push_with_hint(
                format!("Unrecognised log level '{raw}', using the default"),
                "Use one of: trace, debug, info, warning, error",
            );
            Default::default()
        }),
    };
    let log = LogConfig {
        level,
        dir: file_log.logdir,
    };

    let defaults = WatchConfig::default();
    let queue_capacity = match file_watch.queue_capacity {
        Some(0) => {
            warnings.push(format!(
                "watch.queue_capacity must be positive; using {}",
                defaults.queue_capacity
            ));
            defaults.queue_capacity
        }
        Some(capacity) => capacity,
        None => defaults.queue_capacity,
    };
    let watch = WatchConfig {
        queue_capacity,
        ..defaults
    };

    let links: Vec<LinkSpec> = file_links
        .into_iter()
        .enumerate()
        .map(|(index, link)| compose_link(index, link, &mut warnings))
        .collect();

    if config_path.is_some() && links.is_empty() {
        warnings.push("No links configured; nothing will be mirrored");
    }

    let config = Config {
        metadata: ConfigMetadata { config_path },
        log,
        watch,
        links,
    };
    (config, warnings)
}

fn compose_link(index: usize, link: FileLinkConfig, warnings: &mut ConfigWarnings) -> LinkSpec {
    let FileLinkConfig {
        target,
        name,
        recursive,
        events,
    } = link;

    let (events, unknown) = parse_events(&events);
    for event in unknown {
        warnings.push_with_hint(
            format!(
                "Link #{index} ({}): ignoring unknown event '{event}'",
                target.display()
            ),
            "Supported events are create, delete and move",
        );
    }
    if events.is_empty() {
        warnings.push(format!(
            "Link #{index} ({}) has no events enabled and will never change its mirror",
            target.display()
        ));
    }

    LinkSpec {
        source: target,
        mirror: name,
        recursive: recursive.unwrap_or(true),
        events,
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}
