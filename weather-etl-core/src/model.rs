use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

/// Text shown in place of a measurement the API did not deliver.
pub const UNAVAILABLE: &str = "unavailable";

/// Inclusive forecast date range `[start, start + days]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindow {
    pub start: NaiveDate,
    pub days: u32,
}

impl ForecastWindow {
    pub fn new(start: NaiveDate, days: u32) -> Self {
        Self { start, days }
    }

    /// Window starting on today's local calendar date.
    pub fn starting_today(days: u32) -> Self {
        Self::new(Local::now().date_naive(), days)
    }

    pub fn end(&self) -> NaiveDate {
        self.start.checked_add_days(Days::new(u64::from(self.days))).unwrap_or(NaiveDate::MAX)
    }
}

/// One element of the API's `days` array, as delivered.
///
/// Every field is optional. Missing keys, `null`, and values of the wrong
/// JSON type all deserialize to `None`, so a single odd field never costs
/// the whole record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDay {
    #[serde(default, deserialize_with = "lenient_string")]
    pub datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tempmax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tempmin: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub feelslikemax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub feelslikemin: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub precipprob: Option<f64>,
}

/// Raw per-day records fetched for one city.
#[derive(Debug, Clone, PartialEq)]
pub struct CityForecast {
    pub city: String,
    pub days: Vec<RawDay>,
}

/// Primary key of an observation in both warehouse tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservationKey {
    pub city: String,
    pub date: NaiveDate,
}

/// One normalized row: a city's forecast for one date.
///
/// `None` in a measurement is the "unavailable" marker; it is stored as SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub city: String,
    pub date: NaiveDate,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub feels_like_max: Option<f64>,
    pub feels_like_min: Option<f64>,
    pub humidity: Option<f64>,
    pub precip_prob: Option<f64>,
    pub loaded_at: DateTime<Utc>,
}

impl WeatherObservation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey { city: self.city.clone(), date: self.date }
    }
}

/// Human-readable rendering of a measurement.
pub fn display_measure(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => UNAVAILABLE.to_string(),
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_owned))
}
