//! CareStars - hospital quality star ratings
//!
//! A CLI tool that fits latent variable models to hospital quality measure
//! groups, combines them into summary scores and clusters the summaries
//! into star ratings.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad config, unreadable dataset, degenerate input, etc.)

use anyhow::{Context, Result};
use carestars::cli::{Args, OutputFormat};
use carestars::config::{Config, DEFAULT_CONFIG_FILE};
use carestars::dataset::{standardize, Dataset};
use carestars::models::Report;
use carestars::pipeline::run_pipeline;
use carestars::report;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("CareStars v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_rating(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Rating failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default carestars.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize measure groups, weights, the model and clustering.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete rating workflow.
async fn run_rating(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    let plan = config.run_plan()?;

    // Step 1: Load and standardize the dataset
    let input = args.input.clone().context("An input dataset is required")?;
    println!("📥 Loading dataset: {}", input.display());
    let dataset = Dataset::load(&input)?;

    let groups = config.measure_groups();
    let data = standardize(&dataset, &groups, &config.preprocess)?;
    println!(
        "   {} hospitals, {} measure groups",
        data.n_hospitals(),
        data.groups.len()
    );

    // Step 2: Fit the groups and rate
    println!("\n🔬 Fitting latent variable models...");
    println!("   Estimator: {}", report::estimator_label(&plan.lvm.evaluator));
    println!("   Clustering: {}", plan.strategy.kind());
    if plan.parallel {
        println!("   Concurrency: {}", plan.concurrency);
    }

    let progress = if args.quiet {
        None
    } else {
        Some(create_progress_bar(data.groups.len() as u64))
    };
    let outcome = run_pipeline(&data, &plan, progress.as_ref()).await;
    if let Some(ref pb) = progress {
        pb.finish_and_clear();
    }
    let outcome = outcome?;

    // Step 3: Build and save the report
    println!("\n📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let report = report::build_report(&args.input_name(), &outcome, &plan, duration);

    let output_path = Path::new(&config.general.output);
    let written = match args.format {
        OutputFormat::Json => report::write_json_report(&report, output_path),
        OutputFormat::Markdown => report::write_report(&report, output_path),
    };
    written.with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    print_summary(&report);
    println!(
        "\n✅ Rating complete! Report saved to: {}",
        output_path.display()
    );

    Ok(())
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    match ProgressStyle::default_bar().template("   {bar:30.cyan/blue} {pos}/{len} groups {msg}") {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => warn!("Invalid progress template: {}", e),
    }
    pb
}

fn print_summary(report: &Report) {
    println!("\n📊 Rating Summary:");
    println!("   Hospitals: {}", report.metadata.hospitals);
    println!("   Groups estimated: {}", report.metadata.groups_estimated);
    if report.metadata.groups_failed > 0 {
        println!("   ⚠️  Groups failed: {}", report.metadata.groups_failed);
    }
    for (i, count) in report.distribution.iter().enumerate() {
        println!("   {:<5} {}", "★".repeat(i + 1), count);
    }
    let unrated = report.unrated();
    if unrated > 0 {
        println!("   Unrated: {}", unrated);
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
