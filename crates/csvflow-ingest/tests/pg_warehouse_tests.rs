//! Postgres warehouse integration tests
//!
//! **Requirements**:
//! - PostgreSQL must be running and accessible
//! - DATABASE_URL environment variable must be set
//! - Tests will be skipped if DATABASE_URL is not configured
//!
//! Staged objects come from the in-memory store; each test works in its own
//! schema and drops it afterwards.

mod helpers;

use csvflow_ingest::storage::ObjectRef;
use csvflow_ingest::warehouse::{ColumnSchema, JobLoadMetadata, TransformParams, TransformUnit};
use csvflow_ingest::{PgWarehouse, Warehouse, WarehouseConfig};
use helpers::{CallLog, MemoryStore};
use std::sync::Arc;

async fn setup() -> Option<(PgWarehouse, Arc<MemoryStore>, String)> {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }

    let store = Arc::new(MemoryStore::new(Arc::new(CallLog::default())));
    let config = WarehouseConfig::from_env().ok()?;
    let warehouse = match PgWarehouse::connect(&config, store.clone()).await {
        Ok(warehouse) => warehouse,
        Err(e) => {
            eprintln!("Failed to connect to warehouse: {}", e);
            return None;
        },
    };

    let schema = format!("csvflow_test_{}", uuid::Uuid::new_v4().simple());
    Some((warehouse, store, schema))
}

async fn teardown(warehouse: &PgWarehouse, schema: &str) {
    sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema))
        .execute(warehouse.pool())
        .await
        .ok();
}

fn metadata() -> JobLoadMetadata {
    JobLoadMetadata::csv(vec![
        ColumnSchema {
            name: "store_id".to_string(),
            data_type: "INTEGER".to_string(),
            mode: "REQUIRED".to_string(),
        },
        ColumnSchema {
            name: "amount".to_string(),
            data_type: "FLOAT".to_string(),
            mode: "NULLABLE".to_string(),
        },
    ])
}

#[tokio::test]
async fn test_load_transform_and_drop() {
    let Some((warehouse, store, schema)) = setup().await else {
        println!("Skipping test: DATABASE_URL not configured");
        return;
    };

    store.put("temp", "2024-01-02-sales.csv", b"store_id,amount\n1,9.5\n2,3.25\n");
    let staged = ObjectRef::new("temp", "2024-01-02-sales.csv");

    let dataset = warehouse.dataset(&schema, "local").await.unwrap();
    let table = dataset.table("tmp_csv_sales_20240102");

    let result = warehouse.load(&table, &staged, &metadata()).await.unwrap();
    assert!(result.done, "load failed: {:?}", result.errors);
    assert_eq!(result.rows, 2);

    let dir = tempfile::tempdir().unwrap();
    let unit = TransformUnit {
        name: "sales".to_string(),
        path: dir.path().join("sales.sql"),
    };
    std::fs::write(
        &unit.path,
        format!(
            "CREATE TABLE \"{schema}\".sales_totals AS \
             SELECT {{{{table_suffix}}}}::text AS batch, SUM(amount) AS total \
             FROM \"{schema}\".tmp_csv_sales_20240102;"
        ),
    )
    .unwrap();

    let ok = warehouse
        .execute_transform(
            &unit,
            &TransformParams {
                table_suffix: "0-20240102".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(ok);

    let (batch, total): (String, f64) = sqlx::query_as(&format!(
        "SELECT batch, total FROM \"{}\".sales_totals",
        schema
    ))
    .fetch_one(warehouse.pool())
    .await
    .unwrap();
    assert_eq!(batch, "0-20240102");
    assert!((total - 12.75).abs() < f64::EPSILON);

    warehouse.delete_table(&table).await.unwrap();
    let remaining: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = 'tmp_csv_sales_20240102'",
    )
    .bind(&schema)
    .fetch_one(warehouse.pool())
    .await
    .unwrap();
    assert_eq!(remaining.0, 0);

    teardown(&warehouse, &schema).await;
}

#[tokio::test]
async fn test_rejected_rows_report_failed_load() {
    let Some((warehouse, store, schema)) = setup().await else {
        println!("Skipping test: DATABASE_URL not configured");
        return;
    };

    store.put("temp", "bad.csv", b"store_id,amount\nnot-a-number,1\n");
    let staged = ObjectRef::new("temp", "bad.csv");

    let table = warehouse
        .dataset(&schema, "local")
        .await
        .unwrap()
        .table("tmp_csv_bad_20240102");

    let result = warehouse.load(&table, &staged, &metadata()).await.unwrap();
    assert!(!result.done);
    assert!(!result.errors.is_empty());

    teardown(&warehouse, &schema).await;
}

#[tokio::test]
async fn test_failing_transform_returns_false() {
    let Some((warehouse, _store, schema)) = setup().await else {
        println!("Skipping test: DATABASE_URL not configured");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let unit = TransformUnit {
        name: "broken".to_string(),
        path: dir.path().join("broken.sql"),
    };
    std::fs::write(&unit.path, "SELECT * FROM table_that_does_not_exist;").unwrap();

    let ok = warehouse
        .execute_transform(
            &unit,
            &TransformParams {
                table_suffix: "0-20240102".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(!ok);

    teardown(&warehouse, &schema).await;
}
