//! Command-line interface for exportd
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and argument overrides
//! - Subcommands that exit without starting the service
//! - The line protocol spoken on stdin/stdout (`protocol`)

pub mod protocol;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Config, LogLevel};
use crate::error::Result;

/// Export service - background data export worker
#[derive(Parser, Debug)]
#[command(
    name = "exportd",
    version,
    about = "Background export service",
    long_about = "Runs queued MongoDB exports in the background, writing CSV or JSON Lines
artifacts. Commands are read as JSON lines on stdin, replies are written to stdout."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Directory receiving export artifacts
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Number of export workers
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// MongoDB connection URI
    #[arg(long, value_name = "URI")]
    pub uri: Option<String>,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (debug logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for exportd
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Print the effective configuration as TOML
    Config,
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Parse process arguments and load configuration
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, &args);
        config.validate()?;
        Ok(Self { args, config })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Configuration file in use, if one was given
    pub fn config_path(&self) -> Option<&Path> {
        self.args.config_file.as_deref()
    }

    /// Apply CLI arguments to configuration
    ///
    /// Overrides configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        if let Some(dir) = &args.base_dir {
            config.export.base_dir = dir.clone();
        }
        if let Some(workers) = args.workers {
            config.export.workers = workers;
        }
        if let Some(uri) = &args.uri {
            config.source.uri = uri.clone();
        }

        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else {
            config.logging.level
        };
    }

    /// Handle subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if subcommand was handled, false to continue
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Version) => {
                println!("exportd version {}", crate::VERSION);
                println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
                Ok(true)
            }
            Some(Commands::Config) => {
                let text = toml::to_string_pretty(&self.config)
                    .map_err(|e| crate::error::ExportdError::Generic(e.to_string()))?;
                print!("{}", text);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
