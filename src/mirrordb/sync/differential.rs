use std::cmp::Ordering;

use futures::TryStreamExt;

use crate::mirrordb::{Error, Result};
use crate::mirrordb::db::{rows_identical, Row, TableMetaData};
use crate::mirrordb::sync::{SyncContext, SyncStats};


/// Pending writes to the target, flushed in batches.
#[derive(Default)]
struct Changes {
    inserts: Vec<Row>,
    updates: Vec<Row>,
    deletes: Vec<Row>, // primary keys
}

impl Changes {
    fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    async fn flush(&mut self, ctx: &SyncContext, table: &TableMetaData, stats: &mut SyncStats) -> Result<()> {
        // Deletes first, so they can't collide with inserts on other unique keys
        if !self.deletes.is_empty() {
            stats.deleted += ctx.target_conn.delete(table, &self.deletes).await?;
            self.deletes.clear();
        }
        if !self.updates.is_empty() {
            stats.updated += ctx.target_conn.update(table, &self.updates).await?;
            self.updates.clear();
        }
        if !self.inserts.is_empty() {
            stats.inserted += ctx.target_conn.insert(table, &self.inserts).await?;
            self.inserts.clear();
        }
        Ok(())
    }
}

/// Merge join the source and target copies of table, both in primary key order:
/// rows only in the source are inserted, rows only in the target are deleted,
/// and rows in both whose values differ are updated.
pub(crate) async fn synchronize_table(ctx: &SyncContext, table: &TableMetaData, batch_size: usize) -> Result<SyncStats> {
    if !table.has_primary_key() {
        return Err(Error::new(format!("table {} has no primary key, it can't be synchronized differentially", table.name)));
    }

    let mut stats = SyncStats::default();
    let mut changes = Changes::default();
    let mut source_rows = ctx.source_conn.scan(table).await?;
    let mut target_rows = ctx.target_conn.scan(table).await?;
    let mut source_row = source_rows.try_next().await?;
    let mut target_row = target_rows.try_next().await?;

    loop {
        let order = match (&source_row, &target_row) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(s), Some(t)) => table.key(s).cmp(&table.key(t)),
        };

        match order {
            Ordering::Less => {
                if let Some(row) = source_row.take() {
                    changes.inserts.push(row);
                }
                source_row = source_rows.try_next().await?;
            },
            Ordering::Greater => {
                if let Some(row) = target_row.take() {
                    changes.deletes.push(table.key(&row));
                }
                target_row = target_rows.try_next().await?;
            },
            Ordering::Equal => {
                if let (Some(s), Some(t)) = (source_row.take(), target_row.take()) {
                    if !rows_identical(&s, &t) {
                        changes.updates.push(s);
                    }
                }
                source_row = source_rows.try_next().await?;
                target_row = target_rows.try_next().await?;
            },
        }

        if changes.len() >= batch_size {
            changes.flush(ctx, table, &mut stats).await?;
        }
    }

    changes.flush(ctx, table, &mut stats).await?;
    Ok(stats)
}
