use std::sync::Arc;

use crate::{
    error::LoadError,
    normalize::Batch,
    warehouse::{LoadReport, MergeStrategy, TableNames, Warehouse},
};

/// Length of the `_{millis}` suffix appended to per-run staging tables.
pub const RUN_SUFFIX_LEN: usize = 14;

/// Moves a normalized batch into the permanent table through staging.
#[derive(Debug, Clone)]
pub struct Loader {
    warehouse: Arc<dyn Warehouse>,
    tables: TableNames,
    strategy: MergeStrategy,
    per_run_staging: bool,
}

impl Loader {
    pub fn new(warehouse: Arc<dyn Warehouse>, tables: TableNames, strategy: MergeStrategy) -> Self {
        Self { warehouse, tables, strategy, per_run_staging: false }
    }

    /// Stage each run into its own table, `{staging}_{loaded_at millis}`,
    /// so overlapping runs never clear each other's rows.
    pub fn with_per_run_staging(mut self, enabled: bool) -> Self {
        self.per_run_staging = enabled;
        self
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Staging and permanent tables used for this batch.
    pub fn tables_for(&self, batch: &Batch) -> TableNames {
        if self.per_run_staging {
            let run_id = batch.loaded_at().timestamp_millis();
            self.tables.with_staging(format!("{}_{run_id}", self.tables.staging))
        } else {
            self.tables.clone()
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), LoadError> {
        self.warehouse.ensure_schema(&self.tables).await
    }

    /// Ensure schema, then replace staging and merge in one transaction.
    ///
    /// An empty batch still clears staging; the merge then touches nothing.
    pub async fn load(&self, batch: &Batch) -> Result<LoadReport, LoadError> {
        let tables = self.tables_for(batch);
        tables.validate()?;

        self.warehouse.ensure_schema(&tables).await?;
        let result = self.warehouse.stage_and_merge(&tables, batch, self.strategy).await;

        if self.per_run_staging {
            if let Err(e) = self.warehouse.drop_staging(&tables).await {
                tracing::warn!(
                    table = %tables.staging_qualified(),
                    error = %e,
                    "Failed to drop per-run staging table"
                );
            }
        }

        let report = result?;

        if batch.is_empty() {
            tracing::info!(
                permanent = %tables.permanent_qualified(),
                "Empty batch, staging cleared and permanent table unchanged"
            );
        } else {
            tracing::info!(
                staged = report.staged,
                merged = report.merged,
                strategy = %self.strategy,
                permanent = %tables.permanent_qualified(),
                "Batch merged"
            );
        }

        Ok(report)
    }

    pub async fn close(&self) {
        self.warehouse.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{CityForecast, RawDay},
        normalize::normalize,
        warehouse::MemoryWarehouse,
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn batch(loaded_at: DateTime<Utc>, rows: &[(&str, &str, f64)]) -> Batch {
        let forecasts: Vec<CityForecast> = rows
            .iter()
            .map(|(city, date, t)| CityForecast {
                city: city.to_string(),
                days: vec![RawDay {
                    datetime: Some(date.to_string()),
                    tempmax: Some(*t),
                    ..RawDay::default()
                }],
            })
            .collect();
        normalize(&forecasts, loaded_at)
    }

    fn loader(wh: &Arc<MemoryWarehouse>) -> Loader {
        Loader::new(wh.clone(), TableNames::default(), MergeStrategy::default())
    }

    #[tokio::test]
    async fn second_load_overwrites_same_key() {
        let wh = Arc::new(MemoryWarehouse::new());
        let loader = loader(&wh);

        loader.load(&batch(at(6), &[("Madrid", "2024-05-02", 21.5)])).await.unwrap();
        loader.load(&batch(at(7), &[("Madrid", "2024-05-02", 23.0)])).await.unwrap();

        let rows = wh.permanent_rows(loader.tables()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].temp_max, Some(23.0));
        assert_eq!(rows[0].loaded_at, at(7));
    }

    #[tokio::test]
    async fn new_keys_are_inserted_alongside_existing() {
        let wh = Arc::new(MemoryWarehouse::new());
        let loader = loader(&wh);

        loader.load(&batch(at(6), &[("Madrid", "2024-05-02", 21.5)])).await.unwrap();
        let report = loader
            .load(&batch(at(7), &[("Madrid", "2024-05-03", 22.0), ("Berlin", "2024-05-02", 15.0)]))
            .await
            .unwrap();

        assert_eq!(report, LoadReport { staged: 2, merged: 2 });
        assert_eq!(wh.permanent_rows(loader.tables()).await.len(), 3);
    }

    #[tokio::test]
    async fn staging_holds_only_current_run() {
        let wh = Arc::new(MemoryWarehouse::new());
        let loader = loader(&wh);

        let first = batch(at(6), &[("Madrid", "2024-05-02", 21.5), ("Berlin", "2024-05-02", 14.0)]);
        loader.load(&first).await.unwrap();
        loader.load(&batch(at(7), &[("Cordoba", "2024-05-02", 28.0)])).await.unwrap();

        let staged = wh.staging_rows(loader.tables()).await;
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].city, "Cordoba");
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op_for_permanent() {
        let wh = Arc::new(MemoryWarehouse::new());
        let loader = loader(&wh);

        loader.load(&batch(at(6), &[("Madrid", "2024-05-02", 21.5)])).await.unwrap();
        let before = wh.permanent_rows(loader.tables()).await;

        let report = loader.load(&Batch::empty(at(7))).await.unwrap();

        assert_eq!(report, LoadReport::default());
        assert_eq!(wh.permanent_rows(loader.tables()).await, before);
        assert!(wh.staging_rows(loader.tables()).await.is_empty());
    }

    #[tokio::test]
    async fn per_run_staging_is_dropped_after_load() {
        let wh = Arc::new(MemoryWarehouse::new());
        let loader = loader(&wh).with_per_run_staging(true);
        let b = batch(at(6), &[("Madrid", "2024-05-02", 21.5)]);

        let tables = loader.tables_for(&b);
        assert_eq!(tables.staging, format!("stg_weather_data_{}", at(6).timestamp_millis()));
        assert_eq!(tables.staging.len(), "stg_weather_data".len() + RUN_SUFFIX_LEN);

        loader.load(&b).await.unwrap();

        assert_eq!(wh.permanent_rows(&tables).await.len(), 1);
        assert!(!wh.table_names().await.contains(&tables.staging));
    }

    #[tokio::test]
    async fn per_run_staging_is_dropped_on_failure() {
        let wh = Arc::new(MemoryWarehouse::new());
        let loader = loader(&wh).with_per_run_staging(true);
        let b = batch(at(6), &[("Madrid", "2024-05-02", 21.5)]);

        wh.fail_next_merge();
        let err = loader.load(&b).await.unwrap_err();

        assert_eq!(err.step(), "backend");
        assert_eq!(wh.table_names().await, vec!["weather_data"]);
    }

    #[tokio::test]
    async fn invalid_table_names_fail_before_touching_warehouse() {
        let wh = Arc::new(MemoryWarehouse::new());
        let tables = TableNames { permanent: "weather data".into(), ..TableNames::default() };
        let loader = Loader::new(wh.clone(), tables, MergeStrategy::OnConflict);

        let err = loader.load(&Batch::empty(at(6))).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidIdentifier(_)));
        assert!(wh.table_names().await.is_empty());
    }
}
