use std::ops::AddAssign;
use std::sync::Arc;

use crate::mirrordb::Backend;
use crate::mirrordb::db::{Connection, DatabaseMetaData};


/// SyncContext holds everything a strategy needs to synchronize target from source.
pub struct SyncContext {
    pub source: Backend,
    pub target: Backend,
    pub source_conn: Arc<dyn Connection>,
    pub target_conn: Arc<dyn Connection>,
    pub source_metadata: Arc<DatabaseMetaData>,
    pub target_metadata: Arc<DatabaseMetaData>,
}

/// Row counts written to the target by a synchronization run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}
