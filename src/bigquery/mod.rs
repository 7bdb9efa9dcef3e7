// ABOUTME: BigQuery destination: dataset/table management, watermark query and row inserts
// ABOUTME: Implements the Destination trait on top of gcp-bigquery-client

use crate::config::DestinationConfig;
use crate::sync::{Destination, InsertRow, RowInsertError};
use crate::types::{DestinationField, FieldType};
use crate::utils::{validate_identifier, validate_project_id};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use gcp_bigquery_client::model::dataset::Dataset;
use gcp_bigquery_client::model::field_type::FieldType as BqFieldType;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_data_insert_all_request_rows::TableDataInsertAllRequestRows;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::Client;

/// Build the client-side field type for one of our field types
fn to_bq_field_type(field_type: FieldType) -> Result<BqFieldType> {
    serde_json::from_value(serde_json::Value::String(field_type.as_str().to_string()))
        .with_context(|| format!("BigQuery client does not support field type {}", field_type))
}

/// Read a client-side field type back; `None` for types we never produce
fn from_bq_field_type(field_type: &BqFieldType) -> Option<FieldType> {
    match serde_json::to_value(field_type).ok()? {
        serde_json::Value::String(token) => FieldType::from_token(&token),
        _ => None,
    }
}

/// Convert translated fields into a BigQuery table schema
pub fn to_table_schema(fields: &[DestinationField]) -> Result<TableSchema> {
    let schema_fields = fields
        .iter()
        .map(|f| -> Result<TableFieldSchema> {
            Ok(TableFieldSchema::new(&f.name, to_bq_field_type(f.field_type)?))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TableSchema::new(schema_fields))
}

/// Convert a live BigQuery schema into destination fields
///
/// Fields with types outside our vocabulary (RECORD, GEOGRAPHY, ...) are
/// skipped with a warning; they can never match a translated column.
pub fn from_table_fields(table: &str, fields: &[TableFieldSchema]) -> Vec<DestinationField> {
    fields
        .iter()
        .filter_map(|f| match from_bq_field_type(&f.r#type) {
            Some(field_type) => Some(DestinationField::new(&f.name, field_type)),
            None => {
                tracing::warn!(
                    "Ignoring column '{}' of '{}': unsupported BigQuery type {:?}",
                    f.name,
                    table,
                    f.r#type
                );
                None
            }
        })
        .collect()
}

/// `SELECT MAX(id)` over a fully qualified table
pub fn max_identifier_query(project_id: &str, dataset_id: &str, table: &str, id_column: &str) -> String {
    format!(
        "SELECT MAX(`{}`) FROM `{}.{}.{}`",
        id_column, project_id, dataset_id, table
    )
}

/// Interpret the single cell of a `SELECT MAX(id)` response
///
/// An unfinished job is an error, never an empty table: the caller must not
/// fall back to a full read. NULL (empty table) yields `None`. BigQuery
/// returns INT64 cells as JSON strings.
pub fn parse_max_identifier(
    job_complete: Option<bool>,
    cell: Option<&serde_json::Value>,
) -> Result<Option<i64>> {
    if job_complete == Some(false) {
        bail!("Query job did not complete before the server-side wait expired");
    }

    match cell {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(raw)) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid identifier value '{}'", raw)),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow!("Identifier value {} is not a 64-bit integer", n)),
        Some(other) => bail!("Unexpected identifier value {}", other),
    }
}

/// Build one insertAll request
///
/// Invalid rows are skipped rather than failing the whole request, so only
/// the rows BigQuery reports are lost from the batch.
pub fn build_insert_request(
    rows: Vec<TableDataInsertAllRequestRows>,
) -> Result<TableDataInsertAllRequest> {
    let mut request = TableDataInsertAllRequest::new();
    request
        .add_rows(rows)
        .map_err(|e| anyhow!("Failed to build insert request: {}", e))?;
    request.skip_invalid_rows();
    Ok(request)
}

/// BigQuery dataset that replicated tables are written into
pub struct BigQueryDestination {
    client: Client,
    project_id: String,
    dataset_id: String,
}

impl BigQueryDestination {
    /// Authenticate and bind to the configured project and dataset
    ///
    /// Uses the service account key file when configured, otherwise
    /// Application Default Credentials.
    pub async fn connect(config: &DestinationConfig) -> Result<Self> {
        validate_project_id(&config.project_id)?;
        validate_identifier(&config.dataset_id).context("Invalid BigQuery dataset ID")?;

        let client = match &config.credentials_file {
            Some(path) => {
                tracing::info!("Authenticating to BigQuery with service account key {}", path);
                Client::from_service_account_key_file(path)
                    .await
                    .with_context(|| {
                        format!("Failed to create BigQuery client from key file '{}'", path)
                    })?
            }
            None => {
                tracing::info!("Authenticating to BigQuery with application default credentials");
                Client::from_application_default_credentials()
                    .await
                    .context("Failed to create BigQuery client with application default credentials")?
            }
        };

        Ok(Self {
            client,
            project_id: config.project_id.clone(),
            dataset_id: config.dataset_id.clone(),
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, table)
    }
}

#[async_trait]
impl Destination for BigQueryDestination {
    async fn ensure_dataset(&self) -> Result<()> {
        match self
            .client
            .dataset()
            .get(&self.project_id, &self.dataset_id)
            .await
        {
            Ok(_) => {
                tracing::info!("Dataset {}.{} exists", self.project_id, self.dataset_id);
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Dataset lookup failed: {}", e);
                tracing::info!(
                    "Creating dataset {}.{}",
                    self.project_id,
                    self.dataset_id
                );
                self.client
                    .dataset()
                    .create(Dataset::new(&self.project_id, &self.dataset_id))
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to create dataset {}.{}",
                            self.project_id, self.dataset_id
                        )
                    })?;
                tracing::info!("✓ Created dataset {}.{}", self.project_id, self.dataset_id);
                Ok(())
            }
        }
    }

    async fn ensure_table(
        &self,
        table: &str,
        fields: &[DestinationField],
    ) -> Result<Vec<DestinationField>> {
        validate_identifier(table).context("Invalid BigQuery table name")?;

        match self
            .client
            .table()
            .get(&self.project_id, &self.dataset_id, table, None)
            .await
        {
            Ok(existing) => {
                tracing::info!("Table {} exists", self.qualified(table));
                let live = existing.schema.fields.unwrap_or_default();
                Ok(from_table_fields(table, &live))
            }
            Err(e) => {
                tracing::debug!("Table lookup failed: {}", e);
                tracing::info!(
                    "Creating table {} with {} column(s)",
                    self.qualified(table),
                    fields.len()
                );
                let schema = to_table_schema(fields)?;
                self.client
                    .table()
                    .create(Table::new(&self.project_id, &self.dataset_id, table, schema))
                    .await
                    .with_context(|| format!("Failed to create table {}", self.qualified(table)))?;
                tracing::info!("✓ Created table {}", self.qualified(table));
                Ok(fields.to_vec())
            }
        }
    }

    async fn max_identifier(&self, table: &str, id_column: &str) -> Result<Option<i64>> {
        validate_identifier(table).context("Invalid BigQuery table name")?;
        validate_identifier(id_column).context("Invalid identifier column")?;

        let sql = max_identifier_query(&self.project_id, &self.dataset_id, table, id_column);
        tracing::debug!("Running watermark query: {}", sql);

        let result = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql))
            .await
            .with_context(|| format!("Watermark query on {} failed", self.qualified(table)))?;

        let response = result.query_response();
        let first_cell = response
            .rows
            .as_ref()
            .and_then(|rows| rows.first())
            .and_then(|row| row.columns.as_ref())
            .and_then(|columns| columns.first())
            .and_then(|cell| cell.value.as_ref());

        parse_max_identifier(response.job_complete, first_cell)
            .with_context(|| format!("Failed to read watermark from {}", self.qualified(table)))
    }

    async fn insert_rows(
        &self,
        table: &str,
        rows: Vec<InsertRow>,
    ) -> Result<Vec<RowInsertError>> {
        let count = rows.len();
        let request_rows = rows
            .into_iter()
            .map(|row| TableDataInsertAllRequestRows {
                insert_id: Some(row.insert_id),
                json: row.json,
            })
            .collect::<Vec<_>>();

        let request = build_insert_request(request_rows)?;

        let response = self
            .client
            .tabledata()
            .insert_all(&self.project_id, &self.dataset_id, table, request)
            .await
            .with_context(|| format!("Insert of {} row(s) into {} failed", count, self.qualified(table)))?;

        let errors = response
            .insert_errors
            .unwrap_or_default()
            .into_iter()
            .map(|err| RowInsertError {
                index: err.index.unwrap_or(0) as usize,
                message: format!("{:?}", err.errors),
            })
            .collect();

        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_types_round_trip_through_client_model() {
        for field_type in [
            FieldType::Integer,
            FieldType::Float,
            FieldType::Numeric,
            FieldType::BigNumeric,
            FieldType::Boolean,
            FieldType::String,
            FieldType::Bytes,
            FieldType::Date,
            FieldType::Time,
            FieldType::Datetime,
            FieldType::Timestamp,
            FieldType::Json,
        ] {
            let bq = to_bq_field_type(field_type).unwrap();
            assert_eq!(from_bq_field_type(&bq), Some(field_type));
        }
    }

    #[test]
    fn test_table_schema_keeps_order() {
        let fields = vec![
            DestinationField::new("id", FieldType::Integer),
            DestinationField::new("msisdn", FieldType::String),
            DestinationField::new("sent_at", FieldType::Datetime),
        ];

        let schema = to_table_schema(&fields).unwrap();
        let schema_fields = schema.fields.unwrap_or_default();
        let live = from_table_fields("dlrs", &schema_fields);
        assert_eq!(live, fields);
    }

    #[test]
    fn test_parse_max_identifier() {
        let value = serde_json::json!("1042");
        assert_eq!(parse_max_identifier(Some(true), Some(&value)).unwrap(), Some(1042));

        let number = serde_json::json!(7);
        assert_eq!(parse_max_identifier(None, Some(&number)).unwrap(), Some(7));

        // Empty table: MAX over no rows is NULL
        let null = serde_json::Value::Null;
        assert_eq!(parse_max_identifier(Some(true), Some(&null)).unwrap(), None);
        assert_eq!(parse_max_identifier(Some(true), None).unwrap(), None);

        let garbage = serde_json::json!("abc");
        assert!(parse_max_identifier(Some(true), Some(&garbage)).is_err());
    }

    #[test]
    fn test_incomplete_query_job_is_not_an_empty_table() {
        let err = parse_max_identifier(Some(false), None).unwrap_err();
        assert!(err.to_string().contains("did not complete"));

        // Even a stray cell must not be trusted from an unfinished job
        let value = serde_json::json!("5");
        assert!(parse_max_identifier(Some(false), Some(&value)).is_err());
    }

    #[test]
    fn test_insert_request_skips_invalid_rows() {
        let rows = vec![TableDataInsertAllRequestRows {
            insert_id: Some("1".to_string()),
            json: serde_json::json!({"id": 1}),
        }];

        let request = build_insert_request(rows).unwrap();
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["skipInvalidRows"], serde_json::json!(true));
        assert_eq!(body["rows"][0]["insertId"], serde_json::json!("1"));
    }

    #[test]
    fn test_max_identifier_query() {
        assert_eq!(
            max_identifier_query("rt-warehouse", "emalify", "batches", "id"),
            "SELECT MAX(`id`) FROM `rt-warehouse.emalify.batches`"
        );
    }
}
