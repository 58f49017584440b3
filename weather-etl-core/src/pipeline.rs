use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::Config,
    error::{ConfigError, EtlError},
    fetch::{ForecastSource, VisualCrossingSource, fetch_all},
    load::Loader,
    model::ForecastWindow,
    normalize::{Batch, normalize},
    warehouse::{LoadReport, Warehouse},
};

/// What a completed run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub cities_requested: usize,
    pub failed_cities: Vec<String>,
    pub rows: usize,
    pub report: LoadReport,
}

/// Fetched and normalized rows that were not loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub batch: Batch,
    pub failed_cities: Vec<String>,
}

/// Fetch, normalize and load, in that order.
#[derive(Debug)]
pub struct Pipeline {
    source: Box<dyn ForecastSource>,
    loader: Loader,
    cities: Vec<String>,
    window_days: u32,
    window: Option<ForecastWindow>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn ForecastSource>,
        loader: Loader,
        cities: Vec<String>,
        window_days: u32,
    ) -> Self {
        Self { source, loader, cities, window_days, window: None }
    }

    /// Wire the real weather API to `warehouse` from a validated config.
    pub fn from_config(config: &Config, warehouse: Arc<dyn Warehouse>) -> Result<Self, EtlError> {
        let source = Self::source_from_config(config)?;
        Ok(Self::with_source(config, source, warehouse))
    }

    /// The weather API client for `config`. Build it before connecting to
    /// the warehouse; wiring it in afterwards cannot fail.
    pub fn source_from_config(config: &Config) -> Result<Box<dyn ForecastSource>, ConfigError> {
        let source = VisualCrossingSource::new(&config.weather_api)
            .map_err(|e| ConfigError::Invalid { key: "weather_api".into(), reason: e.to_string() });
        Ok(Box::new(source?))
    }

    pub fn with_source(
        config: &Config,
        source: Box<dyn ForecastSource>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let loader = Loader::new(warehouse, config.table_names(), config.warehouse.merge_strategy)
            .with_per_run_staging(config.staging.per_run);

        Self::new(source, loader, config.pipeline.cities.clone(), config.pipeline.window_days)
    }

    /// Pin the forecast window instead of starting from today.
    pub fn with_window(mut self, window: ForecastWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn window(&self) -> ForecastWindow {
        self.window.unwrap_or_else(|| ForecastWindow::starting_today(self.window_days))
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Fetch and normalize without loading.
    pub async fn preview(&self) -> Preview {
        let window = self.window();
        let outcome = fetch_all(self.source.as_ref(), &self.cities, &window).await;
        let batch = normalize(&outcome.forecasts, Utc::now());

        Preview { batch, failed_cities: outcome.failed_cities() }
    }

    pub async fn ensure_schema(&self) -> Result<(), EtlError> {
        self.loader.ensure_schema().await.map_err(|e| {
            tracing::error!(step = e.step(), error = %e, "Schema ensure failed");
            EtlError::from(e)
        })
    }

    /// One full run. Fetch failures are per city and never fail the run;
    /// warehouse failures do.
    pub async fn run(&self) -> Result<RunSummary, EtlError> {
        let window = self.window();
        tracing::info!(
            cities = self.cities.len(),
            start = %window.start,
            end = %window.end(),
            "Starting weather ETL run"
        );

        let outcome = fetch_all(self.source.as_ref(), &self.cities, &window).await;
        let failed_cities = outcome.failed_cities();
        if !failed_cities.is_empty() {
            tracing::warn!(failed = ?failed_cities, "Some cities were skipped");
        }

        let loaded_at = Utc::now();
        let batch = normalize(&outcome.forecasts, loaded_at);
        tracing::info!(rows = batch.len(), loaded_at = %loaded_at, "Normalized forecasts");

        let report = self.loader.load(&batch).await.map_err(|e| {
            tracing::error!(step = e.step(), error = %e, "Load failed, batch not committed");
            EtlError::from(e)
        })?;

        Ok(RunSummary {
            cities_requested: self.cities.len(),
            failed_cities,
            rows: batch.len(),
            report,
        })
    }

    pub async fn close(&self) {
        self.loader.close().await;
    }
}
