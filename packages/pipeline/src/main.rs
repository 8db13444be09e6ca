#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the shop map pipeline.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use shop_map_listing_models::catalog::catalog;
use shop_map_pipeline::config::PipelineConfig;
use shop_map_pipeline::parallel::DEFAULT_JOBS;
use shop_map_pipeline::{RunOptions, commands};
use shop_map_storage::DataLayout;

#[derive(Parser)]
#[command(name = "shop_map_pipeline", about = "Shop listing enrichment pipeline")]
struct Cli {
    /// Data directory (overrides `SHOP_MAP_DATA_DIR`)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory of source CSVs (overrides `SHOP_MAP_SOURCE_DIR`)
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args, Clone)]
struct Selection {
    /// City code
    #[arg(long, default_value = "001")]
    city: String,
    /// Comma-separated district codes. All known districts if omitted.
    #[arg(long, value_delimiter = ',')]
    districts: Vec<String>,
    /// Comma-separated industry codes
    #[arg(long, value_delimiter = ',', default_value = "0009")]
    industries: Vec<String>,
    /// Reuse existing raw snapshots instead of fetching and geocoding again
    #[arg(long)]
    use_raw: bool,
    /// Keep only the first N rows of each partition (for testing)
    #[arg(long)]
    limit: Option<usize>,
}

impl Selection {
    fn districts(&self) -> Vec<String> {
        if self.districts.is_empty() {
            catalog().district_codes().map(str::to_string).collect()
        } else {
            self.districts.clone()
        }
    }

    const fn options(&self) -> RunOptions {
        RunOptions {
            use_raw: self.use_raw,
            limit: self.limit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the selected partitions in this process
    Run {
        #[command(flatten)]
        selection: Selection,
        /// Records per generative call
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Seconds to pause between chunks
        #[arg(long)]
        chunk_delay: Option<u64>,
        /// Attempts per chunk
        #[arg(long)]
        chunk_attempts: Option<u32>,
    },
    /// Run one child process per district, a bounded number at a time
    Parallel {
        #[command(flatten)]
        selection: Selection,
        /// Maximum concurrent child processes
        #[arg(long, default_value_t = DEFAULT_JOBS)]
        jobs: usize,
    },
    /// Merge all snapshots into the canonical raw and final datasets
    Merge {
        /// Upload the merged datasets to the bucket afterwards
        #[arg(long)]
        upload: bool,
    },
    /// List partitions and which snapshots they have
    Status,
    /// Mirror the geocoding cache between the data directory and the bucket
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Download the bucket's cache into the data directory
    Pull,
    /// Upload the local cache to the bucket
    Push,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = shop_map_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(data_dir) = cli.data_dir {
        if cli.source_dir.is_none() && std::env::var_os("SHOP_MAP_SOURCE_DIR").is_none() {
            config.source_dir = data_dir.join("source");
        }
        config.layout = DataLayout::new(data_dir);
    }
    if let Some(source_dir) = cli.source_dir {
        config.source_dir = source_dir;
    }

    let Some(command) = cli.command else {
        return shop_map_pipeline::interactive::run(&config, &multi).await;
    };

    match command {
        Commands::Run {
            selection,
            chunk_size,
            chunk_delay,
            chunk_attempts,
        } => {
            if let Some(chunk_size) = chunk_size {
                config.tunables.chunk_size = chunk_size;
            }
            if let Some(secs) = chunk_delay {
                config.tunables.chunk_delay = Duration::from_secs(secs);
            }
            if let Some(attempts) = chunk_attempts {
                config.tunables.chunk_attempts = attempts;
            }

            let start = Instant::now();
            let results = commands::run(
                &config,
                &multi,
                &selection.city,
                &selection.districts(),
                &selection.industries,
                selection.options(),
            )
            .await?;
            let failures = commands::report_outcomes(&results);
            log::info!(
                "{} partitions in {:.1}s",
                results.len(),
                start.elapsed().as_secs_f64()
            );
            if failures > 0 {
                return Err(format!("{failures} partitions failed").into());
            }
        }
        Commands::Parallel { selection, jobs } => {
            let runs = commands::parallel(
                &config,
                &multi,
                &selection.city,
                &selection.districts(),
                &selection.industries,
                selection.options(),
                jobs,
            )
            .await?;
            let failed: Vec<&str> = runs
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.district.as_str())
                .collect();
            if !failed.is_empty() {
                return Err(format!("Districts failed: {}", failed.join(", ")).into());
            }
        }
        Commands::Merge { upload } => {
            commands::merge(&config, upload).await?;
        }
        Commands::Status => commands::status(&config)?,
        Commands::Cache { action } => match action {
            CacheAction::Pull => commands::cache_pull(&config).await?,
            CacheAction::Push => commands::cache_push(&config).await?,
        },
    }

    Ok(())
}
