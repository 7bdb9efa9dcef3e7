// ABOUTME: Writes row sets to the destination in fixed-size, independent batches
// ABOUTME: Per-batch failures are reported and dead-lettered, never raised

use super::driver::TableLayout;
use super::{Destination, InsertRow};
use crate::deadletter::{DeadLetterEntry, DeadLetterQueue};
use crate::mysql::converter::row_to_debug_json;
use crate::types::Row;
use crate::utils::with_timeout;
use std::collections::BTreeMap;
use std::time::Duration;

/// Only this many per-row errors are logged individually per batch
const LOGGED_ERRORS_PER_BATCH: usize = 5;

/// Outcome of writing one row set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteReport {
    /// Write calls issued (batches containing at least one convertible row)
    pub write_calls: usize,
    pub batches: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
    /// 1-based numbers of batches with at least one failed row
    pub failed_batches: Vec<usize>,
}

impl BatchWriteReport {
    pub fn is_clean(&self) -> bool {
        self.rows_failed == 0
    }

    pub fn merge(&mut self, other: BatchWriteReport) {
        let offset = self.batches;
        self.write_calls += other.write_calls;
        self.batches += other.batches;
        self.rows_written += other.rows_written;
        self.rows_failed += other.rows_failed;
        self.failed_batches
            .extend(other.failed_batches.into_iter().map(|n| n + offset));
    }
}

/// Partitions rows into contiguous batches and writes each with one call
///
/// Batches are independent: a failed or partially rejected batch is logged,
/// optionally dead-lettered, and the next batch is still attempted. Nothing
/// is retried or rolled back.
pub struct BatchWriter<'a, D: ?Sized> {
    destination: &'a D,
    batch_size: usize,
    call_timeout: Option<Duration>,
    dead_letter: Option<&'a DeadLetterQueue>,
}

impl<'a, D> BatchWriter<'a, D>
where
    D: Destination + ?Sized,
{
    pub fn new(destination: &'a D, batch_size: usize) -> Self {
        Self {
            destination,
            batch_size: batch_size.max(1),
            call_timeout: None,
            dead_letter: None,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_dead_letter(mut self, dead_letter: Option<&'a DeadLetterQueue>) -> Self {
        self.dead_letter = dead_letter;
        self
    }

    /// Write `rows` in original order, `batch_size` rows per call
    pub async fn write(&self, layout: &TableLayout, rows: &[Row]) -> BatchWriteReport {
        let table = layout.destination_table();
        let total_batches = rows.len().div_ceil(self.batch_size);
        let mut report = BatchWriteReport::default();

        if rows.is_empty() {
            return report;
        }

        tracing::info!(
            "Inserting {} row(s) into '{}' in {} batch(es)",
            rows.len(),
            table,
            total_batches
        );

        for (batch_idx, chunk) in rows.chunks(self.batch_size).enumerate() {
            let batch_no = batch_idx + 1;
            report.batches += 1;

            let mut dead = Vec::new();
            let failed = self
                .write_chunk(layout, chunk, batch_no, total_batches, &mut report, &mut dead)
                .await;

            if failed > 0 {
                report.rows_failed += failed;
                report.failed_batches.push(batch_no);
            }

            if let Some(queue) = self.dead_letter {
                if let Err(e) = queue.record(&dead) {
                    tracing::error!("Failed to record rejected rows for '{}': {:#}", table, e);
                }
            }
        }

        if report.is_clean() {
            tracing::info!(
                "Successfully inserted {} row(s) into '{}'",
                report.rows_written,
                table
            );
        } else {
            tracing::warn!(
                "Inserted {} row(s) into '{}'; {} row(s) failed in batch(es) {:?}",
                report.rows_written,
                table,
                report.rows_failed,
                report.failed_batches
            );
        }

        report
    }

    /// Write one batch, returning the number of rows that did not land
    async fn write_chunk(
        &self,
        layout: &TableLayout,
        chunk: &[Row],
        batch_no: usize,
        total_batches: usize,
        report: &mut BatchWriteReport,
        dead: &mut Vec<DeadLetterEntry>,
    ) -> usize {
        let table = layout.destination_table();
        let mut failed = 0;
        let mut insert_rows = Vec::with_capacity(chunk.len());
        // Position in `chunk` of each submitted row
        let mut positions = Vec::with_capacity(chunk.len());

        for (pos, row) in chunk.iter().enumerate() {
            match layout.insert_row(row) {
                Ok(insert_row) => {
                    insert_rows.push(insert_row);
                    positions.push(pos);
                }
                Err(e) => {
                    failed += 1;
                    let message = format!("{:#}", e);
                    tracing::warn!(
                        "Skipping row in batch {}/{} for '{}': {}",
                        batch_no,
                        total_batches,
                        table,
                        message
                    );
                    dead.push(self.dead_entry(layout, row, batch_no, message));
                }
            }
        }

        if insert_rows.is_empty() {
            return failed;
        }

        let submitted = insert_rows.len();
        report.write_calls += 1;

        let result = with_timeout(
            "Batch insert",
            self.call_timeout,
            self.destination.insert_rows(table, insert_rows),
        )
        .await;

        match result {
            Ok(errors) if errors.is_empty() => {
                report.rows_written += submitted;
                tracing::debug!(
                    "Inserted batch {}/{} ({} rows) into '{}'",
                    batch_no,
                    total_batches,
                    submitted,
                    table
                );
            }
            Ok(errors) => {
                // Keep one message per rejected row; ignore indices outside the batch
                let rejected: BTreeMap<usize, String> = errors
                    .into_iter()
                    .filter(|e| e.index < submitted)
                    .map(|e| (e.index, e.message))
                    .collect();

                report.rows_written += submitted - rejected.len();
                failed += rejected.len();

                tracing::warn!(
                    "Failed to insert {}/{} row(s) of batch {}/{} into '{}'",
                    rejected.len(),
                    submitted,
                    batch_no,
                    total_batches,
                    table
                );
                for (index, message) in rejected.iter().take(LOGGED_ERRORS_PER_BATCH) {
                    tracing::warn!("  Row {}: {}", index, message);
                }

                for (index, message) in rejected {
                    let row = &chunk[positions[index]];
                    dead.push(self.dead_entry(layout, row, batch_no, message));
                }
            }
            Err(e) => {
                failed += submitted;
                let message = format!("{:#}", e);
                tracing::error!(
                    "Failed to insert batch {}/{} ({} rows) into '{}': {}",
                    batch_no,
                    total_batches,
                    submitted,
                    table,
                    message
                );
                for pos in positions {
                    dead.push(self.dead_entry(layout, &chunk[pos], batch_no, message.clone()));
                }
            }
        }

        failed
    }

    fn dead_entry(
        &self,
        layout: &TableLayout,
        row: &Row,
        batch_no: usize,
        error: String,
    ) -> DeadLetterEntry {
        let json = layout
            .insert_row(row)
            .map(|r: InsertRow| r.json)
            .unwrap_or_else(|_| row_to_debug_json(row, &layout.fields));

        DeadLetterEntry::new(
            layout.destination_table(),
            row.identifier(layout.id_index).map(|id| id.to_string()),
            batch_no,
            error,
            json,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_offsets_batch_numbers() {
        let mut first = BatchWriteReport {
            write_calls: 3,
            batches: 3,
            rows_written: 2500,
            rows_failed: 1,
            failed_batches: vec![2],
        };
        let second = BatchWriteReport {
            write_calls: 1,
            batches: 1,
            rows_written: 10,
            rows_failed: 10,
            failed_batches: vec![1],
        };

        first.merge(second);

        assert_eq!(first.batches, 4);
        assert_eq!(first.write_calls, 4);
        assert_eq!(first.rows_written, 2510);
        assert_eq!(first.rows_failed, 11);
        assert_eq!(first.failed_batches, vec![2, 4]);
        assert!(!first.is_clean());
    }
}
