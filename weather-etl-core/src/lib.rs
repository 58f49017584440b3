//! Core library for the `weather-etl` tool.
//!
//! This crate defines:
//! - Configuration loading and validation
//! - The forecast fetcher over the weather API
//! - Normalization into typed observation rows
//! - The staging + merge loader and its warehouse backends
//!
//! It is used by `weather-etl-cli`, but the pipeline can be driven by any
//! binary with its own `ForecastSource` or `Warehouse`.

pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod warehouse;

pub use config::{Config, RawConfig};
pub use error::{ConfigError, EtlError, FetchError, LoadError};
pub use fetch::{ForecastSource, VisualCrossingSource};
pub use load::Loader;
pub use model::{CityForecast, ForecastWindow, RawDay, WeatherObservation};
pub use normalize::Batch;
pub use pipeline::{Pipeline, Preview, RunSummary};
pub use warehouse::{MemoryWarehouse, MergeStrategy, PgWarehouse, TableNames, Warehouse};
