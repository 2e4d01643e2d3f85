// ABOUTME: Reads tombstone keys from the external deletion ledger
// ABOUTME: The source keeps no per-row tombstones, so deletes are tracked out of band

use anyhow::{Context, Result};
use tokio_postgres::Client;

use crate::sync::applier::quote_identifier;

/// Fetch every key recorded for `table` in the deletion ledger, as text.
///
/// The ledger is a read-only external table keyed by
/// {tracked table name -> key}. It is replayed in full on each sync cycle:
/// the ledger and the watermark have no consistency relationship, so
/// windowing it to the watermark could miss deletions of rows whose own
/// watermark never advanced.
pub async fn fetch_deleted_keys(
    client: &Client,
    ledger_table: &str,
    table: &str,
) -> Result<Vec<String>> {
    let query = format!(
        "SELECT \"key\"::text FROM {} WHERE table_name = $1",
        quote_identifier(ledger_table)
    );

    let rows = client
        .query(&query, &[&table])
        .await
        .with_context(|| format!("Failed to read deletion ledger {} for {}", ledger_table, table))?;

    let keys: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
    tracing::info!(
        "Fetched {} deleted keys for {} from ledger {}",
        keys.len(),
        table,
        ledger_table
    );
    Ok(keys)
}
