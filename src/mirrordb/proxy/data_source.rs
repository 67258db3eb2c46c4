use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::mirrordb::{Backend, Error, Result};
use crate::mirrordb::cluster::Cluster;
use crate::mirrordb::db::{Connection, Connector};
use crate::mirrordb::proxy::{operation, Multiplexer, Parent, ProxyConnection};


/// DataSource is the root of a cluster's handle tree. The native handle of each
/// backend is its Connector.
pub struct DataSource {
    cluster: Arc<Cluster>,
}

impl DataSource {
    pub fn new(cluster: Arc<Cluster>) -> Arc<Self> {
        Arc::new(Self { cluster })
    }

    /// Open a proxy connection, backed by a native connection to every active backend.
    pub async fn connect(self: &Arc<Self>) -> Result<ProxyConnection> {
        if self.cluster.is_stopped() {
            return Err(Error::closed());
        }
        let parent: Arc<dyn Parent<dyn Connector>> = self.clone();
        let node = Multiplexer::new(
            parent,
            operation(|backend: Backend, connector: Arc<dyn Connector>| async move {
                connector.connect(backend.params()).await
            }),
            operation(|_, conn: Arc<dyn Connection>| async move { conn.close().await }),
        );
        let handles = node.handles(&self.cluster.active_backends()).await;
        if handles.is_empty() {
            return Err(Error::no_active_backends());
        }
        debug!(cluster = %self.cluster.id(), backends = handles.len(), "opened proxy connection");
        Ok(ProxyConnection::new(node))
    }
}

impl Parent<dyn Connector> for DataSource {
    fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    fn native<'a>(&'a self, backend: &'a Backend) -> BoxFuture<'a, Option<Arc<dyn Connector>>> {
        Box::pin(async move { Some(backend.connector().clone()) })
    }

    fn is_closed(&self) -> bool {
        self.cluster.is_stopped()
    }
}
