// ABOUTME: Sync driver state machine that runs one replication cycle per poll interval
// ABOUTME: Resolves watermarks, reads new source rows and writes them in batches

use super::batch::{BatchWriteReport, BatchWriter};
use super::watermark::resolve_watermark;
use super::{Destination, InsertRow, ScanRequest, SourceReader};
use crate::deadletter::DeadLetterQueue;
use crate::mysql::converter::row_to_json;
use crate::schema::{schema_differences, translate_schema};
use crate::types::{ColumnDescriptor, DestinationField, Row, TableMapping, Watermark};
use crate::utils::{format_duration, with_timeout};
use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

/// Tunables for the sync loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Sleep between the end of one cycle and the start of the next
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Rows returned by one source read; `None` reads everything new at once
    pub max_rows_per_cycle: Option<usize>,
    /// How long a cycle keeps reading full pages; `None` stops after one page
    pub drain_budget: Option<Duration>,
    /// Deadline applied to each source and destination call
    pub call_timeout: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4 * 60 * 60),
            batch_size: 1000,
            max_rows_per_cycle: Some(10_000),
            drain_budget: Some(Duration::from_secs(300)),
            call_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Where the driver is within the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    ResolvingWatermark,
    ReadingSource,
    WritingBatches,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::ResolvingWatermark => "resolving watermark",
            CycleState::ReadingSource => "reading source",
            CycleState::WritingBatches => "writing batches",
        };
        f.write_str(name)
    }
}

/// A replicated table with its source columns, translated fields and the
/// destination's live schema, fixed at startup
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub mapping: TableMapping,
    pub columns: Vec<ColumnDescriptor>,
    pub fields: Vec<DestinationField>,
    pub live_fields: Vec<DestinationField>,
    /// Position of the identifier column in each row
    pub id_index: usize,
}

impl TableLayout {
    /// Translate the source columns and locate the identifier column
    ///
    /// Fails when any column type cannot be translated or the identifier
    /// column is absent. `live_fields` starts empty until the destination
    /// table has been ensured.
    pub fn from_source(mapping: TableMapping, columns: Vec<ColumnDescriptor>) -> Result<Self> {
        let fields = translate_schema(&columns)
            .with_context(|| format!("Failed to translate schema of '{}'", mapping.source))?;

        let id_index = columns
            .iter()
            .position(|c| c.name == mapping.id_column)
            .ok_or_else(|| {
                anyhow!(
                    "Source table '{}' has no identifier column '{}'",
                    mapping.source,
                    mapping.id_column
                )
            })?;

        Ok(Self {
            mapping,
            columns,
            fields,
            live_fields: Vec::new(),
            id_index,
        })
    }

    pub fn source_table(&self) -> &str {
        &self.mapping.source
    }

    pub fn destination_table(&self) -> &str {
        self.mapping.destination_table()
    }

    pub fn id_column(&self) -> &str {
        &self.mapping.id_column
    }

    /// Convert a source row into its destination form, keyed by identifier
    pub fn insert_row(&self, row: &Row) -> Result<InsertRow> {
        let id = row.identifier(self.id_index).ok_or_else(|| {
            anyhow!(
                "Row has no integer value in identifier column '{}'",
                self.id_column()
            )
        })?;

        Ok(InsertRow {
            insert_id: id.to_string(),
            json: row_to_json(row, &self.fields)?,
        })
    }
}

/// Highest identifier in `rows` when it lies beyond `cursor`
fn advance_cursor(rows: &[Row], id_index: usize, cursor: Option<i64>) -> Option<i64> {
    let max_id = rows.iter().filter_map(|r| r.identifier(id_index)).max()?;
    match cursor {
        Some(current) if max_id <= current => None,
        _ => Some(max_id),
    }
}

/// What one cycle did for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCycleReport {
    pub source_table: String,
    pub destination_table: String,
    pub watermark: Watermark,
    /// Source reads issued; more than one when a backlog was drained
    pub reads: usize,
    pub rows_read: usize,
    pub write: BatchWriteReport,
    pub duration: Duration,
}

/// A table whose cycle was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Outcome of one full cycle over every configured table
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub cycle: u64,
    pub tables: Vec<TableCycleReport>,
    pub failures: Vec<TableFailure>,
    pub duration: Duration,
}

impl CycleSummary {
    pub fn rows_read(&self) -> usize {
        self.tables.iter().map(|t| t.rows_read).sum()
    }

    pub fn rows_written(&self) -> usize {
        self.tables.iter().map(|t| t.write.rows_written).sum()
    }

    pub fn rows_failed(&self) -> usize {
        self.tables.iter().map(|t| t.write.rows_failed).sum()
    }

    /// No table aborted and every row landed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.rows_failed() == 0
    }
}

/// Owns the source and destination and runs replication cycles over a fixed
/// set of tables
///
/// Progress lives only in the destination: every cycle starts by asking it
/// for the highest identifier already present.
pub struct SyncDriver<S, D> {
    source: S,
    destination: D,
    tables: Vec<TableLayout>,
    settings: SyncSettings,
    dead_letter: Option<DeadLetterQueue>,
    state: CycleState,
    cycles: u64,
}

impl<S, D> SyncDriver<S, D>
where
    S: SourceReader,
    D: Destination,
{
    /// Prepare the destination and the schema of every mapped table
    ///
    /// Any failure here is fatal: a table whose schema cannot be translated or
    /// whose destination cannot be created is never synced.
    pub async fn setup(
        mut source: S,
        destination: D,
        mappings: Vec<TableMapping>,
        settings: SyncSettings,
    ) -> Result<Self> {
        if mappings.is_empty() {
            bail!("No tables configured for replication");
        }
        if settings.batch_size == 0 {
            bail!("Batch size must be at least 1");
        }

        let timeout = settings.call_timeout;

        with_timeout("Dataset check", timeout, destination.ensure_dataset())
            .await
            .context("Failed to prepare destination dataset")?;

        let mut tables = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            tracing::info!(
                "Preparing '{}' -> '{}'",
                mapping.source,
                mapping.destination_table()
            );

            let columns = with_timeout(
                "Source introspection",
                timeout,
                source.describe_table(&mapping.source),
            )
            .await
            .with_context(|| format!("Failed to describe source table '{}'", mapping.source))?;

            let mut layout = TableLayout::from_source(mapping, columns)?;

            let live_fields = with_timeout(
                "Table check",
                timeout,
                destination.ensure_table(layout.destination_table(), &layout.fields),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to prepare destination table '{}'",
                    layout.destination_table()
                )
            })?;

            for difference in schema_differences(&layout.fields, &live_fields) {
                tracing::warn!(
                    "Schema mismatch for '{}': {}",
                    layout.destination_table(),
                    difference
                );
            }

            layout.live_fields = live_fields;
            tables.push(layout);
        }

        tracing::info!("✓ Prepared {} table(s) for replication", tables.len());

        Ok(Self {
            source,
            destination,
            tables,
            settings,
            dead_letter: None,
            state: CycleState::Idle,
            cycles: 0,
        })
    }

    /// Record rows the destination rejects in `queue`
    pub fn with_dead_letter(mut self, queue: DeadLetterQueue) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn tables(&self) -> &[TableLayout] {
        &self.tables
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn into_parts(self) -> (S, D) {
        (self.source, self.destination)
    }

    /// Run one cycle over every table, in configuration order
    ///
    /// A failing table is logged and recorded; the remaining tables still run.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let started = Instant::now();
        let cycle = self.cycles + 1;
        tracing::info!(
            "Starting sync cycle {} ({} table(s))",
            cycle,
            self.tables.len()
        );

        let mut summary = CycleSummary {
            cycle,
            ..CycleSummary::default()
        };

        for index in 0..self.tables.len() {
            let table = self.tables[index].source_table().to_string();
            match self.sync_table(index).await {
                Ok(report) => summary.tables.push(report),
                Err(e) => {
                    tracing::error!("Sync of '{}' aborted this cycle: {:#}", table, e);
                    summary.failures.push(TableFailure {
                        table,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        self.cycles = cycle;
        summary.duration = started.elapsed();

        if summary.is_clean() {
            tracing::info!(
                "✓ Sync cycle {} complete: {} row(s) written in {}",
                cycle,
                summary.rows_written(),
                format_duration(summary.duration)
            );
        } else {
            tracing::warn!(
                "Sync cycle {} finished with errors: {} row(s) written, {} row(s) failed, {} table(s) aborted",
                cycle,
                summary.rows_written(),
                summary.rows_failed(),
                summary.failures.len()
            );
        }

        summary
    }

    /// Sync one table by its position in [`SyncDriver::tables`]
    ///
    /// Errors from the watermark query or a source read abort the table for
    /// this cycle. Batch failures do not; they show up in the report.
    pub async fn sync_table(&mut self, index: usize) -> Result<TableCycleReport> {
        let result = self.sync_table_inner(index).await;
        self.state = CycleState::Idle;
        result
    }

    async fn sync_table_inner(&mut self, index: usize) -> Result<TableCycleReport> {
        let started = Instant::now();
        let settings = self.settings;
        let layout = self
            .tables
            .get(index)
            .ok_or_else(|| anyhow!("No configured table at position {}", index))?;

        self.state = CycleState::ResolvingWatermark;
        let watermark = with_timeout(
            "Watermark query",
            settings.call_timeout,
            resolve_watermark(&self.destination, layout),
        )
        .await?;

        let writer = BatchWriter::new(&self.destination, settings.batch_size)
            .with_call_timeout(settings.call_timeout)
            .with_dead_letter(self.dead_letter.as_ref());

        let mut report = TableCycleReport {
            source_table: layout.source_table().to_string(),
            destination_table: layout.destination_table().to_string(),
            watermark,
            reads: 0,
            rows_read: 0,
            write: BatchWriteReport::default(),
            duration: Duration::ZERO,
        };

        let mut cursor = watermark.lower_bound();
        loop {
            self.state = CycleState::ReadingSource;
            let request = ScanRequest {
                table: layout.source_table().to_string(),
                id_column: layout.id_column().to_string(),
                after: cursor,
                limit: settings.max_rows_per_cycle,
            };

            let read = with_timeout(
                "Source read",
                settings.call_timeout,
                self.source.read_rows(&request),
            )
            .await;

            let rows = match read {
                Ok(rows) => rows,
                Err(e) => {
                    // A timed-out read leaves the connection mid-query
                    self.source.reset().await;
                    return Err(e.context(format!(
                        "Failed to read new rows from '{}'",
                        layout.source_table()
                    )));
                }
            };

            report.reads += 1;
            report.rows_read += rows.len();

            if rows.is_empty() {
                if report.reads == 1 {
                    tracing::info!("No new rows in '{}'", layout.source_table());
                }
                break;
            }

            tracing::info!(
                "Read {} new row(s) from '{}' after {}",
                rows.len(),
                layout.source_table(),
                cursor.map_or_else(|| "the beginning".to_string(), |id| id.to_string())
            );

            self.state = CycleState::WritingBatches;
            report.write.merge(writer.write(layout, &rows).await);

            // A short page means the backlog is exhausted
            let page_full = settings
                .max_rows_per_cycle
                .is_some_and(|cap| rows.len() >= cap);
            if !page_full {
                break;
            }

            let Some(budget) = settings.drain_budget else {
                break;
            };
            if started.elapsed() >= budget {
                tracing::info!(
                    "Drain budget of {} used up for '{}'; remaining rows wait for the next cycle",
                    format_duration(budget),
                    layout.source_table()
                );
                break;
            }

            match advance_cursor(&rows, layout.id_index, cursor) {
                Some(next) => cursor = Some(next),
                None => {
                    tracing::warn!(
                        "Cannot advance past {} in '{}'; stopping this cycle",
                        Watermark::from(cursor),
                        layout.source_table()
                    );
                    break;
                }
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    /// Run cycles until `shutdown` completes
    ///
    /// A cycle in progress always finishes; shutdown is only observed while
    /// sleeping between cycles.
    pub async fn run_forever<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.run_cycle().await;

            tracing::info!(
                "Next sync cycle in {}",
                format_duration(self.settings.poll_interval)
            );

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping replication");
                    break;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}
