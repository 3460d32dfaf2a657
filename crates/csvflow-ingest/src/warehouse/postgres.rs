//! Postgres-backed warehouse
//!
//! - dataset  -> schema
//! - load     -> recreate the table from the schema file, then `COPY ... FROM STDIN`
//! - transform -> the unit's SQL with `{{table_suffix}}` bound as a literal

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{
    ColumnSchema, DatasetRef, JobLoadMetadata, LoadResult, TableRef, TransformParams,
    TransformUnit, Warehouse, WriteDisposition,
};
use crate::config::WarehouseConfig;
use crate::storage::{ObjectRef, ObjectStore};

/// Placeholder replaced by the quoted `table_suffix` parameter
pub const TABLE_SUFFIX_PLACEHOLDER: &str = "{{table_suffix}}";

pub struct PgWarehouse {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>) -> Self {
        Self { pool, store }
    }

    pub async fn connect(config: &WarehouseConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to warehouse")?;

        info!("Warehouse connection pool established");

        Ok(Self::new(pool, store))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip(self))]
    async fn dataset(&self, name: &str, location: &str) -> Result<DatasetRef> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(name)))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create schema {}", name))?;

        Ok(DatasetRef {
            name: name.to_string(),
            location: location.to_string(),
        })
    }

    #[instrument(skip(self, metadata), fields(table = %table, staged = %staged))]
    async fn load(
        &self,
        table: &TableRef,
        staged: &ObjectRef,
        metadata: &JobLoadMetadata,
    ) -> Result<LoadResult> {
        if metadata.schema.is_empty() {
            return Ok(LoadResult::failed("schema declares no columns"));
        }

        if metadata.skip_leading_rows > 1 {
            warn!(
                skip_leading_rows = metadata.skip_leading_rows,
                "Only a single header row can be skipped, loading the rest as data"
            );
        }

        let data = self.store.download(staged).await?;
        let target = qualified(table);

        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        if metadata.write_disposition == WriteDisposition::WriteTruncate {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", target))
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to drop {}", table))?;
        }

        sqlx::query(&create_table_sql(&target, &metadata.schema))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to create {}", table))?;

        let statement = copy_sql(&target, &metadata.schema, metadata);

        let copied = match tx.copy_in_raw(&statement).await {
            Ok(mut copy) => {
                let sent = copy.send(data).await.map(|_| ());
                match sent {
                    Ok(()) => copy.finish().await,
                    Err(e) => {
                        // Abort the COPY so the connection is usable for rollback
                        let _ = copy.abort(e.to_string()).await;
                        Err(e)
                    },
                }
            },
            Err(e) => Err(e),
        };

        match copied {
            Ok(rows) => {
                tx.commit().await.context("Failed to commit load")?;
                debug!(rows, "Loaded {}", table);
                Ok(LoadResult::done(rows))
            },
            Err(e) => {
                // Dropping the transaction rolls back the table creation
                warn!(error = %e, "Load job rejected the staged file");
                Ok(LoadResult::failed(e.to_string()))
            },
        }
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn delete_table(&self, table: &TableRef) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", qualified(table)))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to drop {}", table))?;

        Ok(())
    }

    #[instrument(skip(self), fields(unit = %unit.name))]
    async fn execute_transform(
        &self,
        unit: &TransformUnit,
        params: &TransformParams,
    ) -> Result<bool> {
        let template = tokio::fs::read_to_string(&unit.path)
            .await
            .with_context(|| format!("Failed to read transform unit {}", unit.path.display()))?;

        let sql = bind_table_suffix(&template, &params.table_suffix);

        match sqlx::raw_sql(&sql).execute(&self.pool).await {
            Ok(result) => {
                debug!(rows = result.rows_affected(), "Transform unit executed");
                Ok(true)
            },
            Err(e) => {
                warn!(error = %e, "Transform unit failed");
                Ok(false)
            },
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(table: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table.dataset), quote_ident(&table.name))
}

/// Map schema file column types onto Postgres types
fn column_type(data_type: &str) -> &'static str {
    match data_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" | "INT" | "BIGINT" => "BIGINT",
        "FLOAT" | "FLOAT64" | "DOUBLE" => "DOUBLE PRECISION",
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" => "NUMERIC",
        "BOOLEAN" | "BOOL" => "BOOLEAN",
        "DATE" => "DATE",
        "DATETIME" => "TIMESTAMP",
        "TIMESTAMP" => "TIMESTAMPTZ",
        "TIME" => "TIME",
        "JSON" => "JSONB",
        _ => "TEXT",
    }
}

fn create_table_sql(target: &str, schema: &[ColumnSchema]) -> String {
    let columns: Vec<String> = schema
        .iter()
        .map(|column| {
            let mut definition =
                format!("{} {}", quote_ident(&column.name), column_type(&column.data_type));
            if column.is_required() {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect();

    format!("CREATE TABLE IF NOT EXISTS {} ({})", target, columns.join(", "))
}

fn copy_sql(target: &str, schema: &[ColumnSchema], metadata: &JobLoadMetadata) -> String {
    let columns: Vec<String> = schema.iter().map(|c| quote_ident(&c.name)).collect();

    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER {}, DELIMITER {})",
        target,
        columns.join(", "),
        metadata.skip_leading_rows > 0,
        quote_literal(&metadata.field_delimiter.to_string())
    )
}

fn bind_table_suffix(template: &str, table_suffix: &str) -> String {
    template.replace(TABLE_SUFFIX_PLACEHOLDER, &quote_literal(table_suffix))
}
