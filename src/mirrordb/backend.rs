use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::mirrordb::Result;
use crate::mirrordb::db::{Connector, Connection, ConnectionParams};


struct BackendInner {
    id: String,
    weight: u32,
    params: ConnectionParams,
    connector: Arc<dyn Connector>,
}

/// Backend is one database participating in a cluster.
/// It's immutable and cheap to clone. Equality, ordering and hashing are by id.
#[derive(Clone)]
pub struct Backend(Arc<BackendInner>);

impl Backend {
    pub fn new<S: ToString>(id: S, weight: u32, params: ConnectionParams, connector: Arc<dyn Connector>) -> Self {
        Backend(Arc::new(BackendInner {
            id: id.to_string(),
            weight,
            params,
            connector,
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// weight is the relative share of reads this backend serves.
    /// 0 means it only serves reads when it's the only backend left.
    pub fn weight(&self) -> u32 {
        self.0.weight
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.0.params
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.0.connector
    }

    /// Open a new native connection to this backend.
    pub async fn connect(&self) -> Result<Arc<dyn Connection>> {
        self.0.connector.connect(&self.0.params).await
    }
}

impl PartialEq for Backend {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Backend {}

impl PartialOrd for Backend {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Backend {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl Hash for Backend {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state)
    }
}

impl Debug for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Backend(id={}, weight={})", self.0.id, self.0.weight))
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.id)
    }
}
