//! In-process warehouse with the same table semantics as the SQL one.
//! Backs `--dry-run` and the loader tests.

use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::Mutex;

use crate::{
    error::LoadError,
    model::{ObservationKey, WeatherObservation},
    normalize::Batch,
};

use super::{LoadReport, MergeStrategy, TableNames, Warehouse};

type Table = BTreeMap<ObservationKey, WeatherObservation>;

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, Table>>,
    fail_next_merge: AtomicBool,
    closed: AtomicBool,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `stage_and_merge` fail after staging, leaving every table untouched.
    pub fn fail_next_merge(&self) {
        self.fail_next_merge.store(true, Ordering::SeqCst);
    }

    /// Permanent table contents ordered by `(city, date)`.
    pub async fn permanent_rows(&self, tables: &TableNames) -> Vec<WeatherObservation> {
        self.rows(&tables.permanent_qualified()).await
    }

    pub async fn staging_rows(&self, tables: &TableNames) -> Vec<WeatherObservation> {
        self.rows(&tables.staging_qualified()).await
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Qualified names of every existing table, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn rows(&self, qualified: &str) -> Vec<WeatherObservation> {
        self.tables
            .lock()
            .await
            .get(qualified)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn missing_table(name: &str) -> LoadError {
    LoadError::Backend(format!("relation \"{name}\" does not exist"))
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_schema(&self, tables: &TableNames) -> Result<(), LoadError> {
        tables.validate()?;
        let mut guard = self.tables.lock().await;
        guard.entry(tables.staging_qualified()).or_default();
        guard.entry(tables.permanent_qualified()).or_default();
        Ok(())
    }

    async fn stage_and_merge(
        &self,
        tables: &TableNames,
        batch: &Batch,
        _strategy: MergeStrategy,
    ) -> Result<LoadReport, LoadError> {
        tables.validate()?;
        let staging_name = tables.staging_qualified();
        let permanent_name = tables.permanent_qualified();

        let mut guard = self.tables.lock().await;

        // Work on copies and swap them in at the end, so a failure leaves both tables as they were.
        let mut staging = Table::new();
        if !guard.contains_key(&staging_name) {
            return Err(missing_table(&staging_name));
        }
        for row in batch.rows() {
            if staging.insert(row.key(), row.clone()).is_some() {
                return Err(LoadError::Backend(format!(
                    "duplicate key ({}, {}) violates primary key of \"{staging_name}\"",
                    row.city, row.date
                )));
            }
        }

        if self.fail_next_merge.swap(false, Ordering::SeqCst) {
            return Err(LoadError::Backend(format!("merge into \"{permanent_name}\" aborted")));
        }

        let mut permanent =
            guard.get(&permanent_name).cloned().ok_or_else(|| missing_table(&permanent_name))?;
        for (key, row) in &staging {
            permanent.insert(key.clone(), row.clone());
        }

        let report = LoadReport { staged: staging.len() as u64, merged: staging.len() as u64 };
        guard.insert(staging_name, staging);
        guard.insert(permanent_name, permanent);

        Ok(report)
    }

    async fn drop_staging(&self, tables: &TableNames) -> Result<(), LoadError> {
        tables.validate()?;
        self.tables.lock().await.remove(&tables.staging_qualified());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
