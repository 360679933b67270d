//! Configuration loading for ulinkme.
//!
//! Resolves the configuration file (explicit path, `ULINKME_CONFIG`, then a
//! few well-known locations), parses it as JSON or TOML, and turns it into a
//! typed [`Config`] plus a list of non-fatal [`ConfigWarnings`]. The link
//! entries become validated [`ulinkme_core::LinkRule`]s through
//! [`Config::build_rules`].

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, DEFAULT_CONFIG_LOCATIONS, EnvConfig,
    error::ConfigLoadError,
};
pub use models::{
    Config, ConfigMetadata, InvalidLinkError, LinkSpec, LogConfig, LogLevel, ParseLogLevelError,
};
pub use util::CONFIG_ENV_VAR;
pub use validation::{ConfigWarning, ConfigWarnings};
