use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::mirrordb::Result;


/// The persisted membership of a cluster.
#[derive(Serialize, Deserialize, Debug)]
struct ClusterState {
    cluster: String,
    updated: DateTime<Utc>,
    /// ids of the active backends
    active: BTreeSet<String>,
}

/// StateStore persists the set of active backends of a cluster to a yaml file so it
/// survives restarts. Writes go to a temporary file which is flushed to disk and then
/// renamed over the old one, so a crash never leaves a partially written file behind.
pub struct StateStore {
    path: PathBuf,
    // serializes writers, so an older active set can't overwrite a newer one
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted active set, or None if nothing was persisted yet.
    pub async fn load(&self) -> Result<Option<BTreeSet<String>>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted cluster state");
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };
        let state: ClusterState = serde_yaml::from_str(&text)?;
        info!(path = %self.path.display(), cluster = %state.cluster, updated = %state.updated, active = ?state.active, "loaded cluster state");
        Ok(Some(state.active))
    }

    /// Persist the active set returned by active(). It's called while holding the
    /// write lock, so the set written is never older than one already on disk.
    pub async fn save<F: FnOnce() -> BTreeSet<String>>(&self, cluster: &str, active: F) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let state = ClusterState {
            cluster: cluster.to_string(),
            updated: Utc::now(),
            active: active(),
        };
        let text = serde_yaml::to_string(&state)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(dir).await?;
        let tmp_path = self.tmp_path();
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            f.write_all(text.as_bytes()).await?;
            f.sync_data().await?;
        }
        tokio::fs::rename(&tmp_path, &self.path).await?;
        // make the rename itself durable
        File::open(dir).await?.sync_all().await?;
        debug!(path = %self.path.display(), active = ?state.active, "saved cluster state");
        Ok(())
    }

    /// Remove the persisted state, the next start probes every backend.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub(crate) fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
