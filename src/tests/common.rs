use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::mirrordb::{Backend, Cluster, Connectors};
use crate::mirrordb::balancer::BalancerType;
use crate::mirrordb::config::{BackendSettings, ClusterSettings};
use crate::mirrordb::db::{MemoryConnector, MemoryDatabase, Row, TableMetaData, Value};


pub const TABLE: &str = "people";

/// A standalone backend on its own memory connector, for balancer tests.
pub fn backend(id: &str, weight: u32) -> Backend {
    Backend::new(id, weight, params(id), Arc::new(MemoryConnector::new()))
}

fn params(database: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("database".to_string(), database.to_string());
    params
}

/// A state file in the temp dir, unique to the test and process.
pub fn state_file(test: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mirrordb-{}-{}.state.yaml", test, std::process::id()))
}

/// Settings for a cluster of memory backends, each backed by a database named after it.
pub fn settings(test: &str, backends: &[(&str, u32)]) -> ClusterSettings {
    let backends = backends.iter()
        .map(|(id, weight)| BackendSettings::new(*id, *weight, "memory", params(id)))
        .collect();
    let mut settings = ClusterSettings::new(test, backends);
    settings.balancer = BalancerType::RoundRobin;
    settings.probe_retries = 0;
    settings.state_file = Some(state_file(test));
    settings
}

pub struct TestCluster {
    pub cluster: Arc<Cluster>,
    pub memory: Arc<MemoryConnector>,
}

impl TestCluster {
    /// Build a cluster from settings. Any state persisted by a previous run is removed
    /// and every database gets an empty people table.
    pub async fn new(settings: ClusterSettings) -> Self {
        let memory = Arc::new(MemoryConnector::new());
        let mut connectors = Connectors::new();
        connectors.register("memory", memory.clone());
        let cluster = Cluster::new(&settings, &connectors).expect("invalid cluster settings");
        cluster.state_store().clear().await.expect("clear state");
        for backend in cluster.backends() {
            memory.database(backend.id()).create_table(people_table());
        }
        Self { cluster, memory }
    }

    /// Build and start a cluster with every backend active.
    pub async fn started(test: &str, backends: &[(&str, u32)]) -> Self {
        let tc = Self::new(settings(test, backends)).await;
        tc.cluster.start().await.expect("start cluster");
        tc
    }

    pub fn db(&self, id: &str) -> MemoryDatabase {
        self.memory.database(id)
    }

    pub fn backend(&self, id: &str) -> Backend {
        self.cluster.backend(id).expect("unknown backend")
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.cluster.active_backends().iter().map(|b| b.id().to_string()).collect()
    }

    pub fn inactive_ids(&self) -> Vec<String> {
        self.cluster.inactive_backends().iter().map(|b| b.id().to_string()).collect()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.cluster.stop();
        let _ = std::fs::remove_file(self.cluster.state_store().path());
    }
}

/// people(id int primary key, name text)
pub fn people_table() -> TableMetaData {
    TableMetaData::new(TABLE, &[("id", "int"), ("name", "text")], &[0])
}

pub fn person(id: i64, name: &str) -> Row {
    vec![Value::Int(id), Value::Text(name.to_string())]
}
