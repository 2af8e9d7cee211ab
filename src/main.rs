//! Trellis CLI entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_analyzer::AnalysisConfig;

mod commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Incremental dependency-ordered analysis for UI projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the project, reusing cached results for unchanged files
    Analyze {
        /// Ignore and do not update the cache
        #[arg(long)]
        no_cache: bool,

        /// Write a JSON run report
        #[arg(long)]
        report: bool,

        /// Worker threads (0 = all cores)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },
    /// Analyze and exit non-zero on dependency cycles or resolve failures
    Check,
    /// Re-analyze whenever sources change
    Watch,
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AnalysisConfig::load(&cli.root)
        .with_context(|| format!("Failed to load configuration from {}", cli.root.display()))?;

    // Initialize logging
    let log_level = if cli.verbose || config.verbose_logging { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "trellis={log_level},trellis_core={log_level},trellis_analyzer={log_level},trellis_watcher={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Trellis v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Project root: {}", cli.root.display());

    match cli.command {
        Commands::Analyze { no_cache, report, jobs } => {
            let mut config = config;
            if no_cache {
                config.enable_cache = false;
            }
            if let Some(jobs) = jobs {
                config.max_parallelism = jobs;
            }
            commands::analyze(cli.root, config, report).await
        }
        Commands::Check => commands::check(cli.root, config).await,
        Commands::Watch => commands::watch(cli.root, config).await,
        Commands::Clear => commands::clear(cli.root, &config),
        Commands::Version => {
            println!("Trellis v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
