use std::collections::BTreeMap;
use std::sync::Arc;

use fnv::FnvHashMap;
use tracing::info;

use crate::mirrordb::{Error, Result};
use crate::mirrordb::cluster::Cluster;
use crate::mirrordb::config::Settings;
use crate::mirrordb::db::{Connector, MemoryConnector};


/// Connectors maps the connector names used in the config to Connector implementations.
/// The in-process "memory" connector is always available.
#[derive(Clone)]
pub struct Connectors {
    connectors: FnvHashMap<String, Arc<dyn Connector>>,
}

impl Default for Connectors {
    fn default() -> Self {
        let mut connectors = Self { connectors: FnvHashMap::default() };
        connectors.register("memory", Arc::new(MemoryConnector::new()));
        connectors
    }
}

impl Connectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register connector under name, replacing any existing connector with that name.
    pub fn register<S: ToString>(&mut self, name: S, connector: Arc<dyn Connector>) -> &mut Self {
        self.connectors.insert(name.to_string(), connector);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Connector>> {
        self.connectors.get(name)
            .cloned()
            .ok_or_else(|| Error::new(format!("unknown connector {}", name)))
    }
}

/// ClusterRegistry owns the clusters built from Settings.
pub struct ClusterRegistry {
    clusters: BTreeMap<String, Arc<Cluster>>,
}

impl ClusterRegistry {
    pub fn new(settings: &Settings, connectors: &Connectors) -> Result<Self> {
        let mut clusters = BTreeMap::new();
        for cluster_settings in &settings.clusters {
            let cluster = Cluster::new(cluster_settings, connectors)?;
            clusters.insert(cluster.id().to_string(), cluster);
        }
        Ok(Self { clusters })
    }

    pub fn get(&self, id: &str) -> Result<Arc<Cluster>> {
        self.clusters.get(id).cloned().ok_or_else(|| Error::unknown_cluster(id))
    }

    pub fn clusters(&self) -> impl Iterator<Item=&Arc<Cluster>> {
        self.clusters.values()
    }

    pub async fn start(&self) -> Result<()> {
        for cluster in self.clusters.values() {
            cluster.start().await?;
        }
        info!(clusters = self.clusters.len(), "started clusters");
        Ok(())
    }

    pub fn stop(&self) {
        for cluster in self.clusters.values() {
            cluster.stop();
        }
    }
}
