use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt::Debug;

use crate::{
    config::WeatherApiConfig,
    error::FetchError,
    model::{CityForecast, ForecastWindow, RawDay},
};

/// Source of raw per-day forecast records for a single city.
#[async_trait]
pub trait ForecastSource: Send + Sync + Debug {
    async fn fetch(&self, city: &str, window: &ForecastWindow) -> Result<CityForecast, FetchError>;
}

/// Visual Crossing timeline API.
#[derive(Debug, Clone)]
pub struct VisualCrossingSource {
    api_key: String,
    base_url: String,
    unit_group: String,
    elements: String,
    http: Client,
}

impl VisualCrossingSource {
    /// Build a source whose client enforces the configured per-request timeout.
    pub fn new(config: &WeatherApiConfig) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            unit_group: config.unit_group.clone(),
            elements: config.elements.join(","),
            http,
        })
    }

    /// `{base_url}/{city}/{start}/{end}`, with the city percent-encoded as one path segment.
    fn request_url(&self, city: &str, window: &ForecastWindow) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", self.base_url)))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FetchError::InvalidUrl(self.base_url.clone()))?;
            segments
                .pop_if_empty()
                .push(city)
                .push(&window.start.format("%Y-%m-%d").to_string())
                .push(&window.end().format("%Y-%m-%d").to_string());
        }

        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct VcResponse {
    #[serde(default)]
    days: Option<Vec<RawDay>>,
}

#[async_trait]
impl ForecastSource for VisualCrossingSource {
    async fn fetch(&self, city: &str, window: &ForecastWindow) -> Result<CityForecast, FetchError> {
        let url = self.request_url(city, window)?;

        let res = self
            .http
            .get(url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("unitGroup", self.unit_group.as_str()),
                ("include", "days"),
                ("elements", self.elements.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(FetchError::status(status, &body));
        }

        let parsed: VcResponse = serde_json::from_str(&body)?;
        let days = parsed.days.unwrap_or_default();

        if days.is_empty() {
            tracing::warn!(city = %city, "Weather API response contains no weather data");
        }

        Ok(CityForecast { city: city.to_string(), days })
    }
}

/// A city whose request failed, with the reason.
#[derive(Debug)]
pub struct CityFailure {
    pub city: String,
    pub error: FetchError,
}

/// Result of fetching every configured city.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub forecasts: Vec<CityForecast>,
    pub failures: Vec<CityFailure>,
}

impl FetchOutcome {
    pub fn failed_cities(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.city.clone()).collect()
    }
}

/// Fetch each city in order. A failure is logged and recorded, and the
/// remaining cities are still fetched.
pub async fn fetch_all(
    source: &dyn ForecastSource,
    cities: &[String],
    window: &ForecastWindow,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();

    for city in cities {
        match source.fetch(city, window).await {
            Ok(forecast) => {
                tracing::info!(city = %city, days = forecast.days.len(), "Fetched forecast");
                outcome.forecasts.push(forecast);
            }
            Err(error) => {
                tracing::warn!(
                    city = %city,
                    error = %error,
                    "Forecast request failed, skipping city"
                );
                outcome.failures.push(CityFailure { city: city.clone(), error });
            }
        }
    }

    outcome
}
