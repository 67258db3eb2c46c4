use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mirrordb::balancer::BalancerType;
use crate::mirrordb::sync::StrategyConfig;
use crate::mirrordb::{Error, Result};

#[derive(Deserialize, Clone)]
pub struct ClusterSettings {
    /// id identifies the cluster, it must be unique
    pub id: String,
    /// backends are the replicated databases in this cluster
    pub backends: Vec<BackendSettings>,
    /// balancer is the read load balancing policy: simple, random, round-robin (default) or load
    #[serde(default)]
    pub balancer: BalancerType,
    /// sync_strategies available to activate a backend. Defaults to passive, full and diff.
    #[serde(default = "default_sync_strategies")]
    pub sync_strategies: Vec<SyncStrategySettings>,
    /// default_sync is the id of the strategy used when activation doesn't name one, defaults to diff
    #[serde(default = "default_sync")]
    pub default_sync: String,
    /// probe_query is the trivial query run to check if a backend is alive
    #[serde(default = "default_probe_query")]
    pub probe_query: String,
    /// probe_retries is how many more times a failed probe is retried before a backend is considered dead, default 1.
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,
    /// lock_timeout_seconds bounds how long to wait for a lock, 0 (the default) waits forever.
    #[serde(default)]
    pub lock_timeout_seconds: u64,
    /// failure_detect_interval_seconds is how often active backends are probed, 0 (the default) is disabled.
    #[serde(default)]
    pub failure_detect_interval_seconds: u64,
    /// auto_activate_interval_seconds is how often to try activating inactive backends, 0 (the default) is disabled.
    #[serde(default)]
    pub auto_activate_interval_seconds: u64,
    /// state_file overrides the default location of the persisted active set: {state_dir}/{id}.state.yaml
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

#[derive(Deserialize, Clone)]
pub struct BackendSettings {
    /// id identifies the backend within the cluster
    pub id: String,
    /// weight is the relative share of reads, 0 only serves reads if it's the last backend. Default 1.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// connector is the name of the connector used to connect to the backend, default "memory"
    #[serde(default = "default_connector")]
    pub connector: String,
    /// params are passed to the connector as-is
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SyncStrategySettings {
    pub id: String,
    #[serde(flatten)]
    pub strategy: StrategyConfig,
}

const fn default_weight() -> u32 { 1 }
const fn default_probe_retries() -> u32 { 1 }
fn default_connector() -> String { "memory".to_string() }
fn default_probe_query() -> String { "SELECT 1".to_string() }
fn default_sync() -> String { "diff".to_string() }

fn default_sync_strategies() -> Vec<SyncStrategySettings> {
    vec![
        SyncStrategySettings { id: "passive".to_string(), strategy: StrategyConfig::Passive },
        SyncStrategySettings { id: "full".to_string(), strategy: StrategyConfig::FullRefresh(Default::default()) },
        SyncStrategySettings { id: "diff".to_string(), strategy: StrategyConfig::Differential(Default::default()) },
    ]
}

impl ClusterSettings {
    /// Create settings for a cluster with the given backends and defaults for everything else.
    pub fn new<S: ToString>(id: S, backends: Vec<BackendSettings>) -> Self {
        Self {
            id: id.to_string(),
            backends,
            balancer: BalancerType::default(),
            sync_strategies: default_sync_strategies(),
            default_sync: default_sync(),
            probe_query: default_probe_query(),
            probe_retries: default_probe_retries(),
            lock_timeout_seconds: 0,
            failure_detect_interval_seconds: 0,
            auto_activate_interval_seconds: 0,
            state_file: None,
        }
    }

    pub(crate) fn load(&mut self, state_dir: &Path) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::new("cluster id cannot be empty"));
        }
        if self.backends.is_empty() {
            return Err(Error::new(format!("cluster {} has no backends", self.id)));
        }
        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(Error::new(format!("cluster {} has a backend with an empty id", self.id)));
            }
            if !ids.insert(backend.id.as_str()) {
                return Err(Error::new(format!("cluster {} has duplicate backend id {}", self.id, backend.id)));
            }
        }
        let mut strategies = HashSet::new();
        for s in &self.sync_strategies {
            if !strategies.insert(s.id.as_str()) {
                return Err(Error::new(format!("cluster {} has duplicate sync strategy id {}", self.id, s.id)));
            }
            s.strategy.validate()?;
        }
        if !strategies.contains(self.default_sync.as_str()) {
            return Err(Error::unknown_strategy(&self.default_sync));
        }
        if self.state_file.is_none() {
            self.state_file = Some(state_dir.join(format!("{}.state.yaml", self.id)));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }
}

impl BackendSettings {
    pub fn new<S: ToString>(id: S, weight: u32, connector: &str, params: BTreeMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            weight,
            connector: connector.to_string(),
            params,
        }
    }
}
