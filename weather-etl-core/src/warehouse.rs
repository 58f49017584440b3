use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{error::LoadError, normalize::Batch};

pub mod memory;
pub mod postgres;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;

/// Column order shared by both tables and every generated statement.
pub const COLUMNS: [&str; 9] = [
    "city",
    "date",
    "temp_max",
    "temp_min",
    "feels_like_max",
    "feels_like_min",
    "humidity",
    "precip_prob",
    "loaded_at",
];

pub const KEY_COLUMNS: [&str; 2] = ["city", "date"];

pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Width of the `city` column.
pub const MAX_CITY_LEN: usize = 50;

/// How staged rows are folded into the permanent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// `INSERT ... ON CONFLICT (city, date) DO UPDATE`. Postgres only.
    OnConflict,
    /// Delete matching keys, then insert everything from staging.
    /// Works on Redshift, which has no `ON CONFLICT`.
    #[default]
    DeleteInsert,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::OnConflict => "on_conflict",
            MergeStrategy::DeleteInsert => "delete_insert",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staging and permanent table names, optionally inside a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub schema: Option<String>,
    pub staging: String,
    pub permanent: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self { schema: None, staging: "stg_weather_data".into(), permanent: "weather_data".into() }
    }
}

impl TableNames {
    /// Same tables with a different staging table.
    pub fn with_staging(&self, staging: impl Into<String>) -> Self {
        Self { staging: staging.into(), ..self.clone() }
    }

    pub fn qualify(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table.to_string(),
        }
    }

    pub fn staging_qualified(&self) -> String {
        self.qualify(&self.staging)
    }

    pub fn permanent_qualified(&self) -> String {
        self.qualify(&self.permanent)
    }

    /// Reject any name that is not a plain SQL identifier; names are spliced into statements.
    pub fn validate(&self) -> Result<(), LoadError> {
        let names = self.schema.iter().chain([&self.staging, &self.permanent]);
        for name in names {
            if !is_valid_identifier(name) {
                return Err(LoadError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn column_list() -> String {
    COLUMNS.join(", ")
}

/// Idempotent DDL for one table. The primary key constraint is named after
/// the table; Postgres needs the backing index names to be unique per schema.
pub fn create_table_sql(tables: &TableNames, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {qualified} (
    city VARCHAR({MAX_CITY_LEN}) NOT NULL,
    date DATE NOT NULL,
    temp_max DECIMAL(5,2),
    temp_min DECIMAL(5,2),
    feels_like_max DECIMAL(5,2),
    feels_like_min DECIMAL(5,2),
    humidity DECIMAL(5,2),
    precip_prob DECIMAL(5,2),
    loaded_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT {table}_pkey PRIMARY KEY (city, date)
)",
        qualified = tables.qualify(table),
    )
}

pub fn clear_staging_sql(tables: &TableNames) -> String {
    format!("DELETE FROM {}", tables.staging_qualified())
}

pub fn drop_table_sql(tables: &TableNames, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", tables.qualify(table))
}

/// Statements that move staged rows into the permanent table, run in order
/// inside one transaction.
pub fn merge_sql(tables: &TableNames, strategy: MergeStrategy) -> Vec<String> {
    let staging = tables.staging_qualified();
    let permanent = tables.permanent_qualified();
    let columns = column_list();
    let insert = format!("INSERT INTO {permanent} ({columns}) SELECT {columns} FROM {staging}");

    match strategy {
        MergeStrategy::OnConflict => {
            let updates = COLUMNS
                .iter()
                .filter(|c| !KEY_COLUMNS.contains(c))
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            vec![format!("{insert} ON CONFLICT (city, date) DO UPDATE SET {updates}")]
        }
        MergeStrategy::DeleteInsert => vec![
            format!(
                "DELETE FROM {permanent} USING {staging} \
                 WHERE {permanent}.city = {staging}.city AND {permanent}.date = {staging}.date"
            ),
            insert,
        ],
    }
}

/// Row counts from one stage + merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    pub staged: u64,
    pub merged: u64,
}

/// Target warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync + Debug {
    /// Create staging and permanent tables if they are absent.
    async fn ensure_schema(&self, tables: &TableNames) -> Result<(), LoadError>;

    /// Replace the staging contents with `batch` and merge them into the
    /// permanent table, all in one transaction.
    async fn stage_and_merge(
        &self,
        tables: &TableNames,
        batch: &Batch,
        strategy: MergeStrategy,
    ) -> Result<LoadReport, LoadError>;

    /// Drop the staging table. Used for per-run staging tables.
    async fn drop_staging(&self, tables: &TableNames) -> Result<(), LoadError>;

    /// Release every held connection.
    async fn close(&self);
}
