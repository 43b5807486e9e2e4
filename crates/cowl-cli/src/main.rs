//! cowl - information-flow label toolkit
//!
//! Normalizes and combines labels, derives network policies and evaluates
//! flow checks against contexts named in a configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cowl_core::config::{CowlConfig, LogFormat};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// Configuration file picked up from the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG: &str = "cowl.toml";

/// cowl - information-flow label toolkit
#[derive(Parser, Debug)]
#[command(name = "cowl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the
    /// configuration file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Label normalization and algebra
    Label(commands::label::LabelCommand),

    /// Derive the network policy implied by a privacy label
    Policy(commands::policy::PolicyArgs),

    /// Evaluate a flow check against a configured context
    Guard(commands::guard::GuardCommand),
}

fn load_config(explicit: Option<&Path>) -> Result<CowlConfig> {
    if let Some(path) = explicit {
        return CowlConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()));
    }
    let fallback = Path::new(DEFAULT_CONFIG);
    if fallback.exists() {
        return CowlConfig::from_file(fallback)
            .with_context(|| format!("failed to load configuration from {DEFAULT_CONFIG}"));
    }
    Ok(CowlConfig::default())
}

/// `--log-level` wins over `RUST_LOG`, which wins over the configuration.
fn init_logging(flag: Option<&str>, configured: &str, format: LogFormat) {
    let filter = match flag {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env()
            .ok()
            .or_else(|| EnvFilter::try_new(configured).ok()),
    }
    .unwrap_or_else(|| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(cli.log_level.as_deref(), &config.log.level, config.log.format);
    debug!(contexts = config.contexts.len(), "configuration loaded");

    let exit_code = match cli.command {
        Commands::Label(cmd) => commands::label::run(&cmd, cli.json)?,
        Commands::Policy(args) => commands::policy::run(&args, cli.json)?,
        Commands::Guard(cmd) => commands::guard::run(&cmd, &config, cli.json)?,
    };

    // Deny and "does not subsume" are reported through the exit code, not as
    // an error.
    if exit_code != commands::exit_codes::SUCCESS {
        std::process::exit(i32::from(exit_code));
    }
    Ok(())
}
