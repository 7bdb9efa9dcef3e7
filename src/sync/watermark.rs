// ABOUTME: Resolves the replication watermark from the destination table itself
// ABOUTME: The destination's MAX(id) is the only record of replication progress

use super::driver::TableLayout;
use super::Destination;
use crate::types::Watermark;
use anyhow::{Context, Result};

/// Determine the highest identifier already replicated for `layout`
///
/// Returns [`Watermark::Empty`] when the destination table is empty or its
/// live schema has no identifier column. Query failures propagate; the
/// caller must not read the source without a resolved watermark.
pub async fn resolve_watermark<D>(destination: &D, layout: &TableLayout) -> Result<Watermark>
where
    D: Destination + ?Sized,
{
    let table = layout.destination_table();
    let id_column = layout.id_column();

    if !layout.live_fields.iter().any(|f| f.name == id_column) {
        tracing::warn!(
            "Destination table '{}' has no '{}' column; reading the full source table",
            table,
            id_column
        );
        return Ok(Watermark::Empty);
    }

    tracing::debug!("Getting destination watermark for '{}'", table);

    let max_id = destination
        .max_identifier(table, id_column)
        .await
        .with_context(|| format!("Failed to resolve watermark for '{}'", table))?;

    let watermark = Watermark::from(max_id);
    tracing::info!("Destination watermark for '{}' is {}", table, watermark);

    Ok(watermark)
}
