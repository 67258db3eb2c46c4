use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;

use crate::mirrordb::config::ClusterSettings;
use crate::mirrordb::{Error, Result};

#[derive(Deserialize)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(default)]
    pub config_path: PathBuf,
    /// num_workers is the number of tokio worker threads. Default is the number of hardware threads (hyperthreads) for the host.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// state_dir is where each cluster persists its set of active backends, defaults to the current directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// clusters to manage, each is an independent set of replicated backends
    pub clusters: Vec<ClusterSettings>,
}

fn default_num_workers() -> u32 { num_cpus::get() as u32 }
fn default_state_dir() -> PathBuf { PathBuf::from(".") }

impl Settings {
    /// load validates the settings after deserializing them from path.
    pub(crate) fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        if self.num_workers == 0 {
            self.num_workers = default_num_workers();
        }
        if self.clusters.is_empty() {
            return Err(Error::new("no clusters configured"));
        }
        let mut ids = HashSet::new();
        for cluster in &mut self.clusters {
            if !ids.insert(cluster.id.clone()) {
                return Err(Error::new(format!("duplicate cluster id {}", cluster.id)));
            }
            cluster.load(&self.state_dir)?;
        }
        Ok(())
    }

    pub fn cluster(&self, id: &str) -> Option<&ClusterSettings> {
        self.clusters.iter().find(|c| c.id == id)
    }
}
