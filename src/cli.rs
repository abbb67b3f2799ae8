//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::StrategyKind;
use clap::Parser;
use std::path::PathBuf;

/// CareStars - hospital quality star ratings
///
/// Fits a latent variable model to every measure group, combines the group
/// scores into one summary per hospital and clusters the summaries into
/// star ratings. Markdown/JSON reports.
///
/// Examples:
///   carestars --input hospitals.json
///   carestars --input hospitals.json --config carestars.toml --format json
///   carestars --input hospitals.json --strategy centroid --seed 7
///   carestars --input hospitals.json --quadrature --serial
///   carestars --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Hospital measure dataset (JSON)
    ///
    /// Not required when using --init-config.
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "CARESTARS_INPUT",
        required_unless_present = "init_config"
    )]
    pub input: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for carestars.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Overrides `general.output` from the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "markdown")]
    pub format: OutputFormat,

    /// Clustering strategy for star assignment
    #[arg(short, long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Evaluate the likelihood with Gauss-Hermite quadrature instead of the
    /// closed form
    #[arg(long)]
    pub quadrature: bool,

    /// Quadrature node count (implies --quadrature)
    #[arg(long, value_name = "COUNT")]
    pub quadrature_nodes: Option<usize>,

    /// Number of measure groups fitted concurrently
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<usize>,

    /// Fit measure groups one at a time on the main thread
    #[arg(long)]
    pub serial: bool,

    /// Base seed for centroid clustering restarts
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default carestars.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Validate input dataset
        match self.input {
            Some(ref path) if !path.is_file() => {
                return Err(format!("Input file does not exist: {}", path.display()));
            }
            None => return Err("An input dataset is required".to_string()),
            _ => {}
        }

        // Validate concurrency
        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        // Validate quadrature nodes
        if self.quadrature_nodes == Some(0) {
            return Err("Quadrature needs at least 1 node".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Display name of the input dataset.
    pub fn input_name(&self) -> String {
        self.input
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}
