//! PostgreSQL / Redshift warehouse over a `sqlx` pool.

use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres, QueryBuilder, Transaction,
    postgres::{PgConnectOptions, PgPoolOptions},
};

use crate::{config::WarehouseConfig, error::LoadError, normalize::Batch};

use super::{
    LoadReport, MergeStrategy, TableNames, Warehouse, clear_staging_sql, column_list,
    create_table_sql, drop_table_sql, merge_sql,
};

/// Postgres caps a statement at 65535 bind parameters; nine per row.
const ROWS_PER_INSERT: usize = 1000;

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    /// Open a single-connection pool. One run has one writer.
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, LoadError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(LoadError::Connect)?;

        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to warehouse"
        );

        Ok(Self { pool })
    }

    /// Connect from a `postgres://` URL.
    pub async fn connect_url(url: &str) -> Result<Self, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(LoadError::Connect)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LoadError> {
        self.pool.begin().await.map_err(LoadError::Connect)
    }
}

async fn replace_staging(
    tx: &mut Transaction<'static, Postgres>,
    tables: &TableNames,
    batch: &Batch,
) -> Result<u64, sqlx::Error> {
    sqlx::query(&clear_staging_sql(tables)).execute(&mut **tx).await?;

    let prefix = format!("INSERT INTO {} ({}) ", tables.staging_qualified(), column_list());
    let mut staged = 0;

    for chunk in batch.rows().chunks(ROWS_PER_INSERT) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());
        qb.push_values(chunk, |mut row, obs| {
            row.push_bind(obs.city.clone())
                .push_bind(obs.date)
                .push_bind(obs.temp_max)
                .push_bind(obs.temp_min)
                .push_bind(obs.feels_like_max)
                .push_bind(obs.feels_like_min)
                .push_bind(obs.humidity)
                .push_bind(obs.precip_prob)
                .push_bind(obs.loaded_at);
        });
        staged += qb.build().execute(&mut **tx).await?.rows_affected();
    }

    Ok(staged)
}

async fn merge(
    tx: &mut Transaction<'static, Postgres>,
    tables: &TableNames,
    strategy: MergeStrategy,
) -> Result<u64, sqlx::Error> {
    let mut merged = 0;
    for stmt in merge_sql(tables, strategy) {
        merged = sqlx::query(&stmt).execute(&mut **tx).await?.rows_affected();
    }
    // The last statement is always the insert, so its count is the merged row count.
    Ok(merged)
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_schema(&self, tables: &TableNames) -> Result<(), LoadError> {
        tables.validate()?;
        let mut tx = self.begin().await?;

        for table in [&tables.staging, &tables.permanent] {
            sqlx::query(&create_table_sql(tables, table))
                .execute(&mut *tx)
                .await
                .map_err(|source| LoadError::Schema { table: tables.qualify(table), source })?;
        }

        tx.commit()
            .await
            .map_err(|source| LoadError::Schema { table: tables.permanent_qualified(), source })?;

        tracing::info!(
            staging = %tables.staging_qualified(),
            permanent = %tables.permanent_qualified(),
            "Tables created or already present"
        );
        Ok(())
    }

    async fn stage_and_merge(
        &self,
        tables: &TableNames,
        batch: &Batch,
        strategy: MergeStrategy,
    ) -> Result<LoadReport, LoadError> {
        tables.validate()?;
        // Dropping `tx` on any early return rolls back and hands the connection back to the pool.
        let mut tx = self.begin().await?;

        let staged = replace_staging(&mut tx, tables, batch)
            .await
            .map_err(|source| LoadError::Stage { table: tables.staging_qualified(), source })?;

        let merged = merge(&mut tx, tables, strategy)
            .await
            .map_err(|source| LoadError::Merge { table: tables.permanent_qualified(), source })?;

        tx.commit()
            .await
            .map_err(|source| LoadError::Merge { table: tables.permanent_qualified(), source })?;

        Ok(LoadReport { staged, merged })
    }

    async fn drop_staging(&self, tables: &TableNames) -> Result<(), LoadError> {
        tables.validate()?;
        sqlx::query(&drop_table_sql(tables, &tables.staging))
            .execute(&self.pool)
            .await
            .map_err(|source| LoadError::Drop { table: tables.staging_qualified(), source })?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
