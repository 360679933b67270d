//! # ulinkme
//!
//! Watches source directory trees and keeps hardlink mirrors of them up to
//! date. Each configured link replays create, delete and move events from
//! its source tree into its mirror tree; file contents are shared through
//! hardlinks and never copied.
//!
//! The configuration file is resolved from the command line, then the
//! `ULINKME_CONFIG` environment variable, then `ulinkme.toml`,
//! `ulinkme.json`, `config/ulinkme.toml` and `config/ulinkme.json` in the
//! working directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use ulinkme_config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings, LogLevel};
use ulinkme_core::{LinkRule, RunLoop, WatchScheduler, shutdown_signal};

mod logging;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "ulinkme", version)]
#[command(about = "Mirror directory trees with hardlinks as they change")]
struct Cli {
    /// Configuration file, JSON or TOML (falls back to ULINKME_CONFIG)
    config: Option<PathBuf>,

    /// Log level override: trace, debug, info, warning or error.
    /// RUST_LOG takes precedence when set.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration, print the resulting links and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad { config, warnings } =
        loader.load().context("failed to load configuration")?;

    logging::init(&config.log, cli.log_level)?;
    log_warnings(&warnings);

    match config.config_path() {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("using built-in default configuration"),
    }

    let rules = config
        .build_rules()
        .context("invalid link configuration")?;

    match cli.command {
        Some(Command::Check) => {
            print_check(&config, &rules, &warnings);
            Ok(())
        }
        None => run(&config, rules).await,
    }
}

async fn run(config: &Config, rules: Vec<LinkRule>) -> anyhow::Result<()> {
    let mut scheduler = WatchScheduler::with_notify(config.watch.clone());
    for rule in rules {
        scheduler
            .register(rule)
            .context("failed to schedule link")?;
    }

    let summaries = RunLoop::new(scheduler)
        .run_until(shutdown_signal())
        .await
        .context("failed to start watching")?;

    let failed: u64 = summaries.iter().map(|summary| summary.failed).sum();
    if failed > 0 {
        warn!(failed, "stopped with failed events; mirrors may be incomplete");
    } else {
        info!(links = summaries.len(), "stopped");
    }
    Ok(())
}

fn log_warnings(warnings: &ConfigWarnings) {
    for warning in warnings {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

fn print_check(config: &Config, rules: &[LinkRule], warnings: &ConfigWarnings) {
    match config.config_path() {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: built-in default"),
    }
    let log_target = config
        .log
        .file_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "stderr".to_string());
    println!("log: {} -> {}", config.log.level, log_target);
    println!("queue capacity: {}", config.watch.queue_capacity);
    println!("links: {}", rules.len());
    for rule in rules {
        println!("  {rule}");
    }
    if !warnings.is_empty() {
        println!("warnings: {}", warnings.len());
        for warning in warnings {
            println!("  {warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_config_level_and_check() {
        let cli =
            Cli::try_parse_from(["ulinkme", "links.json", "--log-level", "warning", "check"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("links.json")));
        assert_eq!(cli.log_level, Some(LogLevel::Warn));
        assert!(matches!(cli.command, Some(Command::Check)));
    }

    #[test]
    fn everything_is_optional() {
        let cli = Cli::try_parse_from(["ulinkme"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.log_level.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(Cli::try_parse_from(["ulinkme", "--log-level", "loud"]).is_err());
    }
}
