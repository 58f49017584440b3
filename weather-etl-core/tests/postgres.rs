//! Loader against a live PostgreSQL database.
//!
//! Run with:
//! `WEATHER_ETL_TEST_DATABASE_URL=postgres://... cargo test -p weather-etl-core -- --ignored`

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use weather_etl_core::{
    Batch, CityForecast, Loader, MergeStrategy, PgWarehouse, RawDay, TableNames, Warehouse,
    normalize::normalize,
};

fn database_url() -> String {
    std::env::var("WEATHER_ETL_TEST_DATABASE_URL")
        .expect("WEATHER_ETL_TEST_DATABASE_URL must be set")
}

fn batch(loaded_at: DateTime<Utc>, rows: &[(&str, &str, Option<f64>)]) -> Batch {
    let forecasts: Vec<CityForecast> = rows
        .iter()
        .map(|(city, date, humidity)| CityForecast {
            city: city.to_string(),
            days: vec![RawDay {
                datetime: Some(date.to_string()),
                tempmax: Some(21.5),
                humidity: *humidity,
                ..RawDay::default()
            }],
        })
        .collect();
    normalize(&forecasts, loaded_at)
}

async fn fresh_tables(wh: &PgWarehouse, suffix: &str) -> TableNames {
    let tables = TableNames {
        schema: None,
        staging: format!("stg_weather_it_{suffix}"),
        permanent: format!("weather_it_{suffix}"),
    };
    for table in [&tables.staging, &tables.permanent] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}")).execute(wh.pool()).await.unwrap();
    }
    tables
}

async fn permanent_humidity(wh: &PgWarehouse, tables: &TableNames) -> Vec<(String, Option<f64>)> {
    sqlx::query_as::<_, (String, Option<f64>)>(&format!(
        "SELECT city, humidity::float8 FROM {} ORDER BY city, date",
        tables.permanent
    ))
    .fetch_all(wh.pool())
    .await
    .unwrap()
}

async fn check_upsert(strategy: MergeStrategy, suffix: &str) {
    let wh = PgWarehouse::connect_url(&database_url()).await.unwrap();
    let tables = fresh_tables(&wh, suffix).await;
    let loader = Loader::new(Arc::new(wh.clone()), tables.clone(), strategy);

    let first = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap();

    let initial = [("Madrid", "2024-05-02", Some(40.0)), ("Berlin", "2024-05-02", None)];
    loader.load(&batch(first, &initial)).await.unwrap();
    loader.load(&batch(second, &[("Madrid", "2024-05-02", Some(55.0))])).await.unwrap();

    let rows = permanent_humidity(&wh, &tables).await;
    assert_eq!(rows, vec![("Berlin".to_string(), None), ("Madrid".to_string(), Some(55.0))]);

    let staged: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", tables.staging))
        .fetch_one(wh.pool())
        .await
        .unwrap();
    assert_eq!(staged.0, 1);

    loader.load(&Batch::empty(second)).await.unwrap();
    assert_eq!(permanent_humidity(&wh, &tables).await.len(), 2);

    wh.close().await;
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
async fn delete_insert_upserts_on_key() {
    check_upsert(MergeStrategy::DeleteInsert, "delete_insert").await;
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
async fn on_conflict_upserts_on_key() {
    check_upsert(MergeStrategy::OnConflict, "on_conflict").await;
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
async fn ensure_schema_runs_twice() {
    let wh = PgWarehouse::connect_url(&database_url()).await.unwrap();
    let tables = fresh_tables(&wh, "schema").await;

    wh.ensure_schema(&tables).await.unwrap();
    wh.ensure_schema(&tables).await.unwrap();

    wh.close().await;
}
