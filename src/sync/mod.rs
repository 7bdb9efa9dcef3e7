// ABOUTME: Incremental sync core: collaborator traits, watermarks, batching and the driver
// ABOUTME: Exports the SyncDriver that runs one replication cycle per poll interval

pub mod batch;
pub mod driver;
pub mod watermark;

pub use batch::{BatchWriteReport, BatchWriter};
pub use driver::{
    CycleState, CycleSummary, SyncDriver, SyncSettings, TableCycleReport, TableFailure, TableLayout,
};
pub use watermark::resolve_watermark;

use crate::types::{ColumnDescriptor, DestinationField, Row};
use anyhow::Result;
use async_trait::async_trait;

/// Parameters of one source read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub table: String,
    pub id_column: String,
    /// Only rows with identifier strictly greater than this are returned
    pub after: Option<i64>,
    /// Maximum rows returned by this read; `None` is unbounded
    pub limit: Option<usize>,
}

/// A row ready for the destination
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    /// De-duplication key; the row's source identifier
    pub insert_id: String,
    pub json: serde_json::Value,
}

/// A row the destination rejected, by position within the submitted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInsertError {
    pub index: usize,
    pub message: String,
}

/// The relational database rows are replicated from
#[async_trait]
pub trait SourceReader: Send {
    /// Column names and native types, in table order
    async fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Rows with identifier above `request.after`, in identifier order,
    /// at most `request.limit` of them
    async fn read_rows(&mut self, request: &ScanRequest) -> Result<Vec<Row>>;

    /// Drop any connection state after a failed or abandoned call, so the
    /// next call starts on a fresh connection
    async fn reset(&mut self) {}
}

/// The warehouse rows are replicated into
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create the dataset if it does not exist yet (idempotent)
    async fn ensure_dataset(&self) -> Result<()>;

    /// Return the live schema of `table`, creating it from `fields` when missing
    async fn ensure_table(
        &self,
        table: &str,
        fields: &[DestinationField],
    ) -> Result<Vec<DestinationField>>;

    /// `MAX(id_column)` over `table`, `None` when the table is empty
    async fn max_identifier(&self, table: &str, id_column: &str) -> Result<Option<i64>>;

    /// Insert one batch; per-row rejections are returned, not raised
    async fn insert_rows(&self, table: &str, rows: Vec<InsertRow>)
        -> Result<Vec<RowInsertError>>;
}
