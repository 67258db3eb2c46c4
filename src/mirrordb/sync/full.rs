use futures::TryStreamExt;
use tracing::debug;

use crate::mirrordb::Result;
use crate::mirrordb::db::TableMetaData;
use crate::mirrordb::sync::{SyncContext, SyncStats};


/// Replace the target's copy of table with the source's, batch_size rows at a time.
pub(crate) async fn synchronize_table(ctx: &SyncContext, table: &TableMetaData, batch_size: usize) -> Result<SyncStats> {
    let mut stats = SyncStats::default();
    stats.deleted = ctx.target_conn.delete_all(table).await?;
    debug!(table = %table.name, deleted = stats.deleted, "deleted target rows");

    let mut rows = ctx.source_conn.scan(table).await?;
    let mut batch = Vec::with_capacity(batch_size);
    while let Some(row) = rows.try_next().await? {
        batch.push(row);
        if batch.len() >= batch_size {
            stats.inserted += ctx.target_conn.insert(table, &batch).await?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        stats.inserted += ctx.target_conn.insert(table, &batch).await?;
    }
    Ok(stats)
}
