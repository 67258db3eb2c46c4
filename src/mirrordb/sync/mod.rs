mod context;
mod full;
mod differential;

use std::fmt::{Debug, Formatter};

use serde::Deserialize;
use strum::Display;
use tracing::{info, warn, instrument};

use crate::mirrordb::{Error, Result};
use crate::mirrordb::db::{ForeignKey, TableMetaData};

pub use self::context::{SyncContext, SyncStats};


/// The strategy implementations, selected by the "type" key of a strategy's settings.
#[derive(Deserialize, Display, Clone, Debug)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StrategyConfig {
    /// Passive moves no data. Used when the backends share storage.
    Passive,
    /// FullRefresh deletes everything on the target and copies every source row.
    FullRefresh(FullRefreshConfig),
    /// Differential merges source and target by primary key, writing only the differences.
    Differential(DifferentialConfig),
}

#[derive(Deserialize, Clone, Debug)]
pub struct FullRefreshConfig {
    /// batch_size is the maximum number of rows written to the target at a time, default 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DifferentialConfig {
    /// batch_size is the maximum number of pending inserts, updates and deletes before they're flushed to the target, default 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

const fn default_batch_size() -> usize { 1000 }

impl Default for FullRefreshConfig {
    fn default() -> Self {
        Self { batch_size: default_batch_size() }
    }
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self { batch_size: default_batch_size() }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        let batch_size = match self {
            StrategyConfig::Passive => return Ok(()),
            StrategyConfig::FullRefresh(c) => c.batch_size,
            StrategyConfig::Differential(c) => c.batch_size,
        };
        if batch_size == 0 {
            return Err(Error::new(format!("{} batch_size must be > 0", self)));
        }
        Ok(())
    }
}

/// SyncStrategy is a named, configured synchronization strategy of a cluster.
#[derive(Clone)]
pub struct SyncStrategy {
    id: String,
    config: StrategyConfig,
    /// lock the source tables for the duration of the synchronization
    table_locking: bool,
}

impl SyncStrategy {
    pub fn new<S: ToString>(id: S, config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        let table_locking = !matches!(config, StrategyConfig::Passive);
        Ok(Self { id: id.to_string(), config, table_locking })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Returns true if the strategy locks the source tables while it runs.
    pub fn requires_table_locking(&self) -> bool {
        self.table_locking
    }

    /// Bring ctx.target's data in line with ctx.source.
    ///
    /// The source is only ever read. With table locking, that happens inside a transaction
    /// holding a lock on every table, which is rolled back at the end. The target is written
    /// in a single transaction with its foreign keys dropped. On failure the target is rolled
    /// back and any foreign keys that went missing are re-created.
    #[instrument(skip_all, fields(strategy = %self.id, source = %ctx.source, target = %ctx.target))]
    pub async fn synchronize(&self, ctx: &SyncContext) -> Result<SyncStats> {
        let stats = if self.table_locking {
            ctx.source_conn.set_auto_commit(false).await?;
            let result = self.synchronize_locked(ctx).await;
            // End the source transaction without committing, releasing the table locks
            if let Err(e) = ctx.source_conn.rollback().await {
                warn!(%e, "failed to release source table locks");
            }
            result?
        } else {
            self.transfer(ctx).await?
        };
        info!(inserted = stats.inserted, updated = stats.updated, deleted = stats.deleted, "synchronization complete");
        Ok(stats)
    }

    async fn synchronize_locked(&self, ctx: &SyncContext) -> Result<SyncStats> {
        let tables = &ctx.source_metadata.tables;
        for table in tables {
            ctx.source_conn.lock_table(table).await?;
        }
        info!(tables = tables.len(), "locked source tables");
        self.transfer(ctx).await
    }

    /// Copy the data to the target in one transaction.
    async fn transfer(&self, ctx: &SyncContext) -> Result<SyncStats> {
        let batch_size = match &self.config {
            StrategyConfig::Passive => {
                info!("passive synchronization, nothing to copy");
                return Ok(SyncStats::default());
            },
            StrategyConfig::FullRefresh(c) => c.batch_size,
            StrategyConfig::Differential(c) => c.batch_size,
        };

        ctx.target_conn.set_auto_commit(false).await?;
        let mut dropped = Vec::new();
        let result = match self.copy_tables(ctx, batch_size, &mut dropped).await {
            Ok(stats) => ctx.target_conn.commit().await.map(|_| stats),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(%e, "synchronization failed, rolling back target");
            if let Err(e) = ctx.target_conn.rollback().await {
                warn!(%e, "failed to roll back target");
            }
            restore_foreign_keys(ctx, &dropped).await;
        }
        result
    }

    async fn copy_tables(&self, ctx: &SyncContext, batch_size: usize, dropped: &mut Vec<ForeignKey>) -> Result<SyncStats> {
        for fk in ctx.target_metadata.foreign_keys() {
            ctx.target_conn.drop_foreign_key(fk).await?;
            dropped.push(fk.clone());
        }

        let mut stats = SyncStats::default();
        for table in &ctx.source_metadata.tables {
            if ctx.target_metadata.table(&table.name).is_none() {
                return Err(Error::new(format!("table {} does not exist on {}", table.name, ctx.target)));
            }
            let table_stats = match &self.config {
                StrategyConfig::Passive => SyncStats::default(),
                StrategyConfig::FullRefresh(_) => full::synchronize_table(ctx, table, batch_size).await?,
                StrategyConfig::Differential(_) => differential::synchronize_table(ctx, table, batch_size).await?,
            };
            log_table(table, &table_stats);
            stats += table_stats;
        }

        for fk in dropped.iter() {
            ctx.target_conn.create_foreign_key(fk).await?;
        }
        Ok(stats)
    }
}

fn log_table(table: &TableMetaData, stats: &SyncStats) {
    info!(table = %table.name, inserted = stats.inserted, updated = stats.updated, deleted = stats.deleted, "synchronized table");
}

/// Best-effort re-creation of dropped foreign keys that are missing after a rollback.
/// Errors are logged, the original failure is what gets reported.
async fn restore_foreign_keys(ctx: &SyncContext, dropped: &[ForeignKey]) {
    if dropped.is_empty() {
        return;
    }
    let existing = match ctx.target_conn.metadata().await {
        Ok(metadata) => metadata.foreign_keys().cloned().collect::<Vec<_>>(),
        Err(e) => {
            warn!(%e, "cannot read target metadata, re-creating every dropped foreign key");
            Vec::new()
        },
    };
    for fk in dropped {
        if existing.iter().any(|e| e.name == fk.name && e.table == fk.table) {
            continue;
        }
        if let Err(e) = ctx.target_conn.create_foreign_key(fk).await {
            warn!(%e, constraint = %fk.name, table = %fk.table, "failed to re-create foreign key");
        }
    }
}

impl Debug for SyncStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("SyncStrategy(id={}, type={})", self.id, self.config))
    }
}
