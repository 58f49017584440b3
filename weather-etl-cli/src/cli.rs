use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use weather_etl_core::{
    Config, MemoryWarehouse, PgWarehouse, Pipeline, Warehouse,
    config::default_config_path,
};

use crate::{configure, output};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Load daily weather forecasts into the warehouse")]
pub struct Cli {
    /// Config file; defaults to `config.toml` in the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch forecasts for every configured city and upsert them.
    Run {
        /// Load into an in-memory warehouse instead of the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch and normalize, then print the rows without loading them.
    Preview,

    /// Create the staging and permanent tables if they are missing.
    InitSchema,

    /// Write the config file interactively.
    Configure,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };

        match self.command {
            Command::Configure => configure::run(&path),
            Command::Run { dry_run } => run_pipeline(&load_config(&path)?, dry_run).await,
            Command::Preview => preview(&load_config(&path)?).await,
            Command::InitSchema => init_schema(&load_config(&path)?).await,
        }
    }
}

/// Configuration errors abort here, before any network or database call.
fn load_config(path: &Path) -> Result<Config> {
    Config::load(path)
        .with_context(|| format!("Cannot run without a valid config ({})", path.display()))
}

async fn run_pipeline(config: &Config, dry_run: bool) -> Result<()> {
    let source = Pipeline::source_from_config(config)?;
    let warehouse: Arc<dyn Warehouse> = if dry_run {
        tracing::info!("Dry run, loading into an in-memory warehouse");
        Arc::new(MemoryWarehouse::new())
    } else {
        connect(config).await?
    };

    let pipeline = Pipeline::with_source(config, source, warehouse);
    let result = pipeline.run().await;
    pipeline.close().await;

    let summary = result.context("Weather ETL run failed; rerun once the warehouse is reachable")?;
    print!("{}", output::render_summary(&summary));
    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<dyn Warehouse>> {
    let warehouse = PgWarehouse::connect(&config.warehouse).await.map_err(|e| {
        tracing::error!(host = %config.warehouse.host, error = %e, "Warehouse connection failed");
        e
    })?;
    Ok(Arc::new(warehouse))
}

async fn preview(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config, Arc::new(MemoryWarehouse::new()))?;
    let preview = pipeline.preview().await;

    print!("{}", output::render_table(&preview.batch));
    if !preview.failed_cities.is_empty() {
        println!("Skipped cities: {}", preview.failed_cities.join(", "));
    }
    Ok(())
}

async fn init_schema(config: &Config) -> Result<()> {
    let source = Pipeline::source_from_config(config)?;
    let pipeline = Pipeline::with_source(config, source, connect(config).await?);
    let result = pipeline.ensure_schema().await;
    pipeline.close().await;

    result?;
    println!("Tables are in place.");
    Ok(())
}
