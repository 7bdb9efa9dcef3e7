// ABOUTME: MySQL table introspection and incremental row reading
// ABOUTME: Builds watermark-bounded, capped scans with validated identifiers

use crate::sync::ScanRequest;
use crate::types::{ColumnDescriptor, Row, Value};
use crate::utils::{quote_mysql_ident, validate_identifier};
use anyhow::{bail, Context, Result};
use mysql_async::{prelude::*, Conn, Params};

/// Describe a MySQL table's columns in ordinal order
///
/// Equivalent to `DESCRIBE table`: returns column names paired with the full
/// `COLUMN_TYPE` string (e.g. `int(11) unsigned`, `varchar(255)`).
///
/// # Errors
///
/// Fails if the table name is invalid, the query fails, or the table does not
/// exist (no columns found).
///
/// # Examples
///
/// ```no_run
/// # use mysql_bigquery_replicator::mysql::{connect_mysql_url, reader::describe_table};
/// # async fn example() -> anyhow::Result<()> {
/// let mut conn = connect_mysql_url("mysql://localhost:3306/mydb").await?;
/// let columns = describe_table(&mut conn, "mydb", "batches").await?;
/// println!("Found {} columns", columns.len());
/// # Ok(())
/// # }
/// ```
pub async fn describe_table(
    conn: &mut Conn,
    db_name: &str,
    table_name: &str,
) -> Result<Vec<ColumnDescriptor>> {
    validate_identifier(table_name).context("Invalid table name for schema query")?;

    tracing::info!("Fetching schema for '{}.{}'", db_name, table_name);

    let query = r#"
        SELECT COLUMN_NAME, COLUMN_TYPE
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    let columns: Vec<(String, String)> = conn
        .exec(query, (db_name, table_name))
        .await
        .with_context(|| format!("Failed to describe table '{}.{}'", db_name, table_name))?;

    if columns.is_empty() {
        bail!(
            "Table '{}.{}' does not exist or has no columns",
            db_name,
            table_name
        );
    }

    let columns: Vec<ColumnDescriptor> = columns
        .into_iter()
        .map(|(name, source_type)| ColumnDescriptor::new(name, source_type))
        .collect();

    tracing::debug!(
        "Schema for '{}.{}': {}",
        db_name,
        table_name,
        columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.source_type))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(columns)
}

/// Build the row scan for one incremental read
///
/// Produces `SELECT * FROM db.table [WHERE id > ?] ORDER BY id [LIMIT n]`
/// with the watermark bound as a statement parameter. Ordering by the
/// identifier keeps consecutive capped reads contiguous.
pub fn build_scan_query(db_name: &str, request: &ScanRequest) -> Result<(String, Params)> {
    validate_identifier(&request.table).context("Invalid table name for data reading")?;
    validate_identifier(&request.id_column).context("Invalid identifier column name")?;

    let table = format!(
        "{}.{}",
        quote_mysql_ident(db_name),
        quote_mysql_ident(&request.table)
    );
    let id_column = quote_mysql_ident(&request.id_column);

    let mut sql = format!("SELECT * FROM {}", table);
    let params = match request.after {
        Some(after) => {
            sql.push_str(&format!(" WHERE {} > ?", id_column));
            Params::Positional(vec![Value::Int(after)])
        }
        None => Params::Empty,
    };
    sql.push_str(&format!(" ORDER BY {}", id_column));
    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok((sql, params))
}

/// Read the rows selected by `request`
///
/// Uses the binary protocol so integers arrive as integers and temporal
/// columns as structured values.
pub async fn read_rows(conn: &mut Conn, db_name: &str, request: &ScanRequest) -> Result<Vec<Row>> {
    let (sql, params) = build_scan_query(db_name, request)?;

    tracing::info!("Fetching rows from '{}.{}'", db_name, request.table);
    tracing::debug!("MySQL query: {}", sql);

    let rows: Vec<mysql_async::Row> = conn
        .exec(sql.as_str(), params)
        .await
        .with_context(|| format!("Failed to read rows from table '{}'", request.table))?;

    let rows: Vec<Row> = rows
        .into_iter()
        .map(|row| {
            Row::new(
                row.unwrap_raw()
                    .into_iter()
                    .map(|value| value.unwrap_or(Value::NULL))
                    .collect(),
            )
        })
        .collect();

    tracing::info!(
        "Fetched {} row(s) from '{}.{}'",
        rows.len(),
        db_name,
        request.table
    );

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(after: Option<i64>, limit: Option<usize>) -> ScanRequest {
        ScanRequest {
            table: "batches".to_string(),
            id_column: "id".to_string(),
            after,
            limit,
        }
    }

    #[test]
    fn test_full_scan_without_watermark() {
        let (sql, params) = build_scan_query("emalify", &request(None, None)).unwrap();
        assert_eq!(sql, "SELECT * FROM `emalify`.`batches` ORDER BY `id`");
        assert!(matches!(params, Params::Empty));
    }

    #[test]
    fn test_incremental_scan_binds_watermark() {
        let (sql, params) = build_scan_query("emalify", &request(Some(100), None)).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `emalify`.`batches` WHERE `id` > ? ORDER BY `id`"
        );
        match params {
            Params::Positional(values) => assert_eq!(values, vec![Value::Int(100)]),
            other => panic!("expected positional params, got {:?}", other),
        }
    }

    #[test]
    fn test_capped_scan_adds_limit() {
        let (sql, _) = build_scan_query("emalify", &request(Some(5), Some(10_000))).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `emalify`.`batches` WHERE `id` > ? ORDER BY `id` LIMIT 10000"
        );
    }

    #[test]
    fn test_reject_malicious_names() {
        let mut bad_table = request(None, None);
        bad_table.table = "batches; DROP TABLE batches;".to_string();
        assert!(build_scan_query("emalify", &bad_table).is_err());

        let mut bad_column = request(None, None);
        bad_column.id_column = "id` OR 1=1 --".to_string();
        assert!(build_scan_query("emalify", &bad_column).is_err());
    }
}
