use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

use crate::model::{CityForecast, ObservationKey, RawDay, WeatherObservation};

/// One run's normalized rows, all stamped with the same `loaded_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    loaded_at: DateTime<Utc>,
    rows: Vec<WeatherObservation>,
}

impl Batch {
    pub fn empty(loaded_at: DateTime<Utc>) -> Self {
        Self { loaded_at, rows: Vec::new() }
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn rows(&self) -> &[WeatherObservation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Flatten fetched forecasts into rows, in fetch order.
///
/// Days without a parseable `datetime` are dropped, since they cannot form a
/// key. A repeated `(city, date)` replaces the earlier row in place.
pub fn normalize(forecasts: &[CityForecast], loaded_at: DateTime<Utc>) -> Batch {
    let mut rows: Vec<WeatherObservation> = Vec::new();
    let mut index: HashMap<ObservationKey, usize> = HashMap::new();

    for forecast in forecasts {
        for day in &forecast.days {
            let Some(row) = to_observation(&forecast.city, day, loaded_at) else {
                tracing::warn!(
                    city = %forecast.city,
                    datetime = ?day.datetime,
                    "Skipping day without a valid date"
                );
                continue;
            };

            match index.get(&row.key()) {
                Some(&pos) => {
                    tracing::warn!(
                        city = %row.city,
                        date = %row.date,
                        "Duplicate day in response, keeping the last one"
                    );
                    rows[pos] = row;
                }
                None => {
                    index.insert(row.key(), rows.len());
                    rows.push(row);
                }
            }
        }
    }

    Batch { loaded_at, rows }
}

fn to_observation(
    city: &str,
    day: &RawDay,
    loaded_at: DateTime<Utc>,
) -> Option<WeatherObservation> {
    let date = NaiveDate::parse_from_str(day.datetime.as_deref()?.trim(), "%Y-%m-%d").ok()?;

    Some(WeatherObservation {
        city: city.to_string(),
        date,
        temp_max: day.tempmax,
        temp_min: day.tempmin,
        feels_like_max: day.feelslikemax,
        feels_like_min: day.feelslikemin,
        humidity: day.humidity,
        precip_prob: day.precipprob,
        loaded_at,
    })
}
