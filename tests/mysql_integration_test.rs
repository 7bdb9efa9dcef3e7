// ABOUTME: Integration tests for the MySQL source reader against a live server
// ABOUTME: Run with TEST_MYSQL_URL set and `cargo test -- --ignored`

use mysql_async::prelude::*;
use mysql_bigquery_replicator::config::SourceConfig;
use mysql_bigquery_replicator::mysql::converter::row_to_json;
use mysql_bigquery_replicator::mysql::{connect_mysql_url, MySqlSource};
use mysql_bigquery_replicator::schema::translate_schema;
use mysql_bigquery_replicator::sync::{ScanRequest, SourceReader};
use mysql_bigquery_replicator::types::FieldType;
use std::env;

/// Helper to get test MySQL source URL from environment
fn get_test_mysql_url() -> Option<String> {
    env::var("TEST_MYSQL_URL").ok()
}

fn source_config(url: &str) -> SourceConfig {
    SourceConfig {
        url: Some(url.to_string()),
        host: String::new(),
        port: 3306,
        user: None,
        password: None,
        database: None,
    }
}

/// Create the `replicator_batches` fixture with ids 1..=20
async fn create_batches_table(mysql_url: &str) -> anyhow::Result<()> {
    let mut conn = connect_mysql_url(mysql_url).await?;

    conn.query_drop("DROP TABLE IF EXISTS replicator_batches")
        .await?;
    conn.query_drop(
        "
        CREATE TABLE replicator_batches (
            id BIGINT UNSIGNED PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            amount DECIMAL(12, 2),
            active TINYINT(1),
            payload BLOB,
            sent_at DATETIME(6),
            scheduled DATE,
            meta JSON
        )
    ",
    )
    .await?;

    let rows: Vec<(u64, String, Option<&str>, Option<i32>, Option<Vec<u8>>)> = (1..=20)
        .map(|id| {
            let amount = if id % 5 == 0 { None } else { Some("12.50") };
            let payload = (id % 2 == 0).then(|| vec![0u8, 159, 146, 150]);
            (id, format!("batch {}", id), amount, Some((id % 2) as i32), payload)
        })
        .collect();

    conn.exec_batch(
        "INSERT INTO replicator_batches (id, name, amount, active, payload, sent_at, scheduled, meta)
         VALUES (?, ?, ?, ?, ?, '2024-03-01 09:30:00.250000', '2024-03-01', '{\"k\": 1}')",
        rows,
    )
    .await?;

    conn.disconnect().await?;
    Ok(())
}

async fn cleanup(mysql_url: &str) -> anyhow::Result<()> {
    let mut conn = connect_mysql_url(mysql_url).await?;
    conn.query_drop("DROP TABLE IF EXISTS replicator_batches")
        .await?;
    conn.disconnect().await?;
    Ok(())
}

fn scan(after: Option<i64>, limit: Option<usize>) -> ScanRequest {
    ScanRequest {
        table: "replicator_batches".to_string(),
        id_column: "id".to_string(),
        after,
        limit,
    }
}

#[tokio::test]
#[ignore]
async fn test_describe_and_translate_live_table() {
    let mysql_url = get_test_mysql_url().expect("TEST_MYSQL_URL must be set");
    create_batches_table(&mysql_url)
        .await
        .expect("Failed to create test table");

    let mut source = MySqlSource::connect(&source_config(&mysql_url))
        .await
        .expect("Failed to connect");
    let columns = source
        .describe_table("replicator_batches")
        .await
        .expect("Failed to describe table");
    let fields = translate_schema(&columns).expect("Failed to translate schema");

    let types: Vec<(&str, FieldType)> = fields
        .iter()
        .map(|f| (f.name.as_str(), f.field_type))
        .collect();
    assert_eq!(
        types,
        vec![
            ("id", FieldType::Integer),
            ("name", FieldType::String),
            ("amount", FieldType::Numeric),
            ("active", FieldType::Integer),
            ("payload", FieldType::Bytes),
            ("sent_at", FieldType::Datetime),
            ("scheduled", FieldType::Date),
            ("meta", FieldType::Json),
        ]
    );

    source.close().await;
    let _ = cleanup(&mysql_url).await;
}

#[tokio::test]
#[ignore]
async fn test_incremental_read_honours_watermark_and_cap() {
    let mysql_url = get_test_mysql_url().expect("TEST_MYSQL_URL must be set");
    create_batches_table(&mysql_url)
        .await
        .expect("Failed to create test table");

    let mut source = MySqlSource::connect(&source_config(&mysql_url))
        .await
        .expect("Failed to connect");

    let all = source.read_rows(&scan(None, None)).await.unwrap();
    assert_eq!(all.len(), 20);

    let after = source.read_rows(&scan(Some(15), None)).await.unwrap();
    let ids: Vec<i64> = after.iter().filter_map(|r| r.identifier(0)).collect();
    assert_eq!(ids, vec![16, 17, 18, 19, 20]);

    let capped = source.read_rows(&scan(Some(4), Some(3))).await.unwrap();
    let ids: Vec<i64> = capped.iter().filter_map(|r| r.identifier(0)).collect();
    assert_eq!(ids, vec![5, 6, 7]);

    let none = source.read_rows(&scan(Some(20), Some(3))).await.unwrap();
    assert!(none.is_empty());

    source.close().await;
    let _ = cleanup(&mysql_url).await;
}

#[tokio::test]
#[ignore]
async fn test_live_rows_convert_to_json() {
    let mysql_url = get_test_mysql_url().expect("TEST_MYSQL_URL must be set");
    create_batches_table(&mysql_url)
        .await
        .expect("Failed to create test table");

    let mut source = MySqlSource::connect(&source_config(&mysql_url))
        .await
        .expect("Failed to connect");
    let columns = source.describe_table("replicator_batches").await.unwrap();
    let fields = translate_schema(&columns).unwrap();
    let rows = source.read_rows(&scan(Some(9), Some(1))).await.unwrap();

    let json = row_to_json(&rows[0], &fields).expect("Failed to convert row");
    assert_eq!(json["id"], serde_json::json!(10));
    assert_eq!(json["name"], serde_json::json!("batch 10"));
    assert_eq!(json["amount"], serde_json::Value::Null);
    assert_eq!(json["payload"], serde_json::json!("AJ+Slg=="));
    assert_eq!(json["sent_at"], serde_json::json!("2024-03-01 09:30:00.250000"));
    assert_eq!(json["scheduled"], serde_json::json!("2024-03-01"));

    source.close().await;
    let _ = cleanup(&mysql_url).await;
}

#[tokio::test]
#[ignore]
async fn test_connect_rejects_url_without_database() {
    let mysql_url = get_test_mysql_url().expect("TEST_MYSQL_URL must be set");
    let without_db = match mysql_url.rsplit_once('/') {
        Some((base, _)) => base.to_string(),
        None => mysql_url.clone(),
    };

    let result = MySqlSource::connect(&source_config(&without_db)).await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore]
async fn test_reset_reconnects_on_next_read() {
    let mysql_url = get_test_mysql_url().expect("TEST_MYSQL_URL must be set");
    create_batches_table(&mysql_url)
        .await
        .expect("Failed to create fixture table");

    let mut source = MySqlSource::connect(&source_config(&mysql_url))
        .await
        .expect("Failed to connect");
    let first = source.read_rows(&scan(None, Some(5))).await.unwrap();
    assert_eq!(first.len(), 5);

    source.reset().await;
    source.reset().await;

    let second = source.read_rows(&scan(Some(5), Some(5))).await.unwrap();
    let ids: Vec<i64> = second.iter().filter_map(|r| r.identifier(0)).collect();
    assert_eq!(ids, vec![6, 7, 8, 9, 10]);

    source.close().await;
    let _ = cleanup(&mysql_url).await;
}
