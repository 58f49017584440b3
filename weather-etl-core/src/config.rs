use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::ConfigError,
    load::RUN_SUFFIX_LEN,
    warehouse::{MAX_CITY_LEN, MAX_IDENTIFIER_LEN, MergeStrategy, TableNames, is_valid_identifier},
};

pub const DEFAULT_BASE_URL: &str =
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline";
pub const DEFAULT_UNIT_GROUP: &str = "metric";
pub const DEFAULT_ELEMENTS: &str =
    "datetime,tempmax,tempmin,feelslikemax,feelslikemin,humidity,precipprob";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WINDOW_DAYS: u32 = 10;
pub const DEFAULT_STAGING_TABLE: &str = "stg_weather_data";
pub const DEFAULT_PERMANENT_TABLE: &str = "weather_data";

/// Configuration exactly as stored on disk. Every key is optional here;
/// [`RawConfig::validate`] decides what is actually required.
///
/// Example TOML:
/// ```toml
/// [weather_api]
/// key = "..."
///
/// [warehouse]
/// host = "example.redshift.amazonaws.com"
/// port = 5439
/// database = "dev"
/// user = "etl"
/// password = "..."
///
/// [pipeline]
/// cities = ["Santiago", "Madrid", "Cordoba", "Berlin"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub weather_api: RawWeatherApi,
    #[serde(default)]
    pub warehouse: RawWarehouse,
    #[serde(default)]
    pub pipeline: RawPipeline,
    #[serde(default)]
    pub staging: RawStaging,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWeatherApi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_group: Option<String>,
    /// Comma-separated element list sent to the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWarehouse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPipeline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStaging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanent_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_run: Option<bool>,
}

/// Validated configuration. Constructing one is the only way to build a pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub weather_api: WeatherApiConfig,
    pub warehouse: WarehouseConfig,
    pub pipeline: PipelineConfig,
    pub staging: StagingConfig,
}

#[derive(Clone)]
pub struct WeatherApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub unit_group: String,
    pub elements: Vec<String>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: Option<String>,
    pub connect_timeout: Duration,
    pub merge_strategy: MergeStrategy,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cities: Vec<String>,
    pub window_days: u32,
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub table: String,
    pub permanent_table: String,
    pub per_run: bool,
}

impl fmt::Debug for WeatherApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherApiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("unit_group", &self.unit_group)
            .field("elements", &self.elements)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("schema", &self.schema)
            .field("connect_timeout", &self.connect_timeout)
            .field("merge_strategy", &self.merge_strategy)
            .finish()
    }
}

impl Config {
    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        RawConfig::load(path)?.validate()
    }

    /// Table names for this run's staging and permanent tables.
    pub fn table_names(&self) -> TableNames {
        TableNames {
            schema: self.warehouse.schema.clone(),
            staging: self.staging.table.clone(),
            permanent: self.staging.permanent_table.clone(),
        }
    }
}

impl RawConfig {
    /// Load config from disk. A missing file is an error: nothing can run without one.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Write { path: parent.to_path_buf(), source })?;
        }

        let toml = toml::to_string_pretty(self)?;

        fs::write(path, toml)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }

    /// Check every required key and every constrained value, reporting all
    /// missing keys at once.
    pub fn validate(self) -> Result<Config, ConfigError> {
        let mut missing = Vec::new();

        let api_key = required(self.weather_api.key, "weather_api.key", &mut missing);
        let host = required(self.warehouse.host, "warehouse.host", &mut missing);
        let database = required(self.warehouse.database, "warehouse.database", &mut missing);
        let user = required(self.warehouse.user, "warehouse.user", &mut missing);
        let password = required(self.warehouse.password, "warehouse.password", &mut missing);
        let port = self.warehouse.port;
        if port.is_none() {
            missing.push("warehouse.port".to_string());
        }

        let cities: Vec<String> = self
            .pipeline
            .cities
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if cities.is_empty() {
            missing.push("pipeline.cities".to_string());
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = cities.iter().find(|c| !seen.insert(c.to_lowercase())) {
            let reason = format!("city '{dup}' is listed more than once");
            return Err(invalid("pipeline.cities", reason));
        }
        if let Some(long) = cities.iter().find(|c| c.chars().count() > MAX_CITY_LEN) {
            let reason = format!("city '{long}' is longer than {MAX_CITY_LEN} characters");
            return Err(invalid("pipeline.cities", reason));
        }

        let timeout_secs = self.weather_api.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(invalid("weather_api.timeout_secs", "must be greater than zero"));
        }
        let connect_timeout_secs =
            self.warehouse.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        if connect_timeout_secs == 0 {
            return Err(invalid("warehouse.connect_timeout_secs", "must be greater than zero"));
        }

        let elements =
            parse_elements(self.weather_api.elements.as_deref().unwrap_or(DEFAULT_ELEMENTS));

        let schema = non_blank(self.warehouse.schema);
        let table = non_blank(self.staging.table).unwrap_or_else(|| DEFAULT_STAGING_TABLE.into());
        let permanent_table = non_blank(self.staging.permanent_table)
            .unwrap_or_else(|| DEFAULT_PERMANENT_TABLE.into());
        let per_run = self.staging.per_run.unwrap_or(false);

        for (key, name) in [
            ("warehouse.schema", schema.as_deref()),
            ("staging.table", Some(table.as_str())),
            ("staging.permanent_table", Some(permanent_table.as_str())),
        ] {
            if let Some(name) = name.filter(|n| !is_valid_identifier(n)) {
                return Err(invalid(key, format!("'{name}' is not a valid SQL identifier")));
            }
        }
        if table.eq_ignore_ascii_case(&permanent_table) {
            return Err(invalid("staging.table", "must differ from staging.permanent_table"));
        }
        if per_run && table.len() + RUN_SUFFIX_LEN > MAX_IDENTIFIER_LEN {
            let max = MAX_IDENTIFIER_LEN - RUN_SUFFIX_LEN;
            let reason = format!("must be at most {max} characters when staging.per_run is set");
            return Err(invalid("staging.table", reason));
        }

        Ok(Config {
            weather_api: WeatherApiConfig {
                api_key: api_key.unwrap_or_default(),
                base_url: non_blank(self.weather_api.base_url)
                    .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
                unit_group: non_blank(self.weather_api.unit_group)
                    .unwrap_or_else(|| DEFAULT_UNIT_GROUP.into()),
                elements,
                timeout: Duration::from_secs(timeout_secs),
            },
            warehouse: WarehouseConfig {
                host: host.unwrap_or_default(),
                port: port.unwrap_or_default(),
                database: database.unwrap_or_default(),
                user: user.unwrap_or_default(),
                password: password.unwrap_or_default(),
                schema,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                merge_strategy: self.warehouse.merge_strategy.unwrap_or_default(),
            },
            pipeline: PipelineConfig {
                cities,
                window_days: self.pipeline.window_days.unwrap_or(DEFAULT_WINDOW_DAYS),
            },
            staging: StagingConfig { table, permanent_table, per_run },
        })
    }
}

/// Path to the config file in the platform config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs =
        ProjectDirs::from("dev", "weather-etl", "weather-etl").ok_or(ConfigError::NoConfigDir)?;

    Ok(dirs.config_dir().join("config.toml"))
}

/// Split a comma-separated element list, always keeping `datetime` first.
fn parse_elements(raw: &str) -> Vec<String> {
    let mut elements = vec!["datetime".to_string()];
    for e in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if !elements.iter().any(|existing| existing == e) {
            elements.push(e.to_string());
        }
    }
    elements
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &str, missing: &mut Vec<String>) -> Option<String> {
    let value = non_blank(value);
    if value.is_none() {
        missing.push(key.to_string());
    }
    value
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key: key.to_string(), reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [weather_api]
        key = "API_KEY"

        [warehouse]
        host = "localhost"
        port = 5439
        database = "dev"
        user = "etl"
        password = "secret"

        [pipeline]
        cities = ["Santiago", "Madrid", "Cordoba", "Berlin"]
    "#;

    fn parse(toml: &str) -> RawConfig {
        toml::from_str(toml).expect("test TOML must parse")
    }

    #[test]
    fn full_config_validates_with_defaults() {
        let cfg = parse(FULL).validate().expect("config must validate");

        assert_eq!(cfg.weather_api.api_key, "API_KEY");
        assert_eq!(cfg.weather_api.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.weather_api.unit_group, "metric");
        assert_eq!(cfg.weather_api.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(cfg.pipeline.window_days, 10);
        assert_eq!(cfg.pipeline.cities.len(), 4);
        assert_eq!(cfg.staging.table, "stg_weather_data");
        assert_eq!(cfg.staging.permanent_table, "weather_data");
        assert!(!cfg.staging.per_run);
        assert_eq!(cfg.warehouse.merge_strategy, MergeStrategy::DeleteInsert);
    }

    #[test]
    fn empty_config_reports_every_missing_key() {
        let err = RawConfig::default().validate().unwrap_err();

        match err {
            ConfigError::MissingKeys(keys) => {
                for key in [
                    "weather_api.key",
                    "warehouse.host",
                    "warehouse.port",
                    "warehouse.database",
                    "warehouse.user",
                    "warehouse.password",
                    "pipeline.cities",
                ] {
                    assert!(keys.iter().any(|k| k == key), "missing {key} in {keys:?}");
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blank_password_counts_as_missing() {
        let mut raw = parse(FULL);
        raw.warehouse.password = Some("   ".into());

        let err = raw.validate().unwrap_err();
        assert!(err.to_string().contains("warehouse.password"));
    }

    #[test]
    fn duplicate_cities_are_rejected() {
        let mut raw = parse(FULL);
        raw.pipeline.cities = Some(vec!["Madrid".into(), "madrid".into()]);

        let err = raw.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "pipeline.cities"));
    }

    #[test]
    fn overlong_city_is_rejected() {
        let mut raw = parse(FULL);
        raw.pipeline.cities = Some(vec!["Madrid".into(), "x".repeat(MAX_CITY_LEN + 1)]);

        let err = raw.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "pipeline.cities"));

        let mut raw = parse(FULL);
        raw.pipeline.cities = Some(vec!["é".repeat(MAX_CITY_LEN)]);
        assert!(raw.validate().is_ok());
    }

    #[test]
    fn bad_identifiers_are_rejected() {
        let mut raw = parse(FULL);
        raw.staging.table = Some("stg; DROP TABLE x".into());

        let err = raw.validate().unwrap_err();
        assert!(err.to_string().contains("staging.table"));
    }

    #[test]
    fn staging_and_permanent_must_differ() {
        let mut raw = parse(FULL);
        raw.staging.table = Some("weather_data".into());

        assert!(raw.validate().is_err());
    }

    #[test]
    fn per_run_staging_name_leaves_room_for_run_suffix() {
        let longest = "s".repeat(MAX_IDENTIFIER_LEN - RUN_SUFFIX_LEN);

        let mut raw = parse(FULL);
        raw.staging.table = Some(format!("{longest}s"));
        assert!(raw.clone().validate().is_ok());

        raw.staging.per_run = Some(true);
        let err = raw.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "staging.table"));

        let mut raw = parse(FULL);
        raw.staging.table = Some(longest);
        raw.staging.per_run = Some(true);
        let cfg = raw.validate().unwrap();
        let run_id = chrono::Utc::now().timestamp_millis();
        assert!(is_valid_identifier(&format!("{}_{run_id}", cfg.staging.table)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut raw = parse(FULL);
        raw.weather_api.timeout_secs = Some(0);

        let err = raw.validate().unwrap_err();
        assert!(err.to_string().contains("weather_api.timeout_secs"));
    }

    #[test]
    fn elements_always_include_datetime() {
        assert_eq!(
            parse_elements("tempmax, humidity,tempmax"),
            vec!["datetime", "tempmax", "humidity"]
        );
        assert_eq!(parse_elements(DEFAULT_ELEMENTS).len(), 7);
    }

    #[test]
    fn merge_strategy_parses_from_toml() {
        assert!(parse(FULL).warehouse.merge_strategy.is_none());

        let raw = parse("[warehouse]\nmerge_strategy = \"on_conflict\"\n");
        assert_eq!(raw.warehouse.merge_strategy, Some(MergeStrategy::OnConflict));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = parse(FULL).validate().unwrap();
        let debug = format!("{cfg:?}");

        assert!(!debug.contains("secret"));
        assert!(!debug.contains("API_KEY"));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let raw = parse(FULL);
        raw.save(&path).unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.warehouse.host, "localhost");
        assert_eq!(cfg.warehouse.port, 5439);
    }

    #[test]
    fn missing_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let raw = RawConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(raw.weather_api.key.is_none());
    }
}
