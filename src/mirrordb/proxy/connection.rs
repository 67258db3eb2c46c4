use std::collections::BTreeMap;
use std::sync::Arc;

use crate::mirrordb::{Backend, Error, Result};
use crate::mirrordb::cluster::Cluster;
use crate::mirrordb::db::{Connection, Connector, DatabaseMetaData, IsolationLevel, PreparedStatement, Row, Value};
use crate::mirrordb::proxy::{operation, Method, Multiplexer, Operation, Parent, ProxyStatement};


pub type ConnectionNode = Multiplexer<dyn Connector, dyn Connection>;

/// ProxyConnection looks like a single connection, but is backed by one native
/// connection per active backend.
pub struct ProxyConnection {
    node: Arc<ConnectionNode>,
}

impl ProxyConnection {
    pub(crate) fn new(node: Arc<ConnectionNode>) -> Self {
        Self { node }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        self.node.cluster()
    }

    pub fn node(&self) -> &Arc<ConnectionNode> {
        &self.node
    }

    /// Execute a statement on every active backend, returning the affected row count.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.node.invoke(Method::Execute, execute_op(sql, params)).await
    }

    /// Like execute, but returns the affected row count of every backend.
    pub async fn execute_all(&self, sql: &str, params: &[Value]) -> Result<BTreeMap<Backend, u64>> {
        self.node.check_open()?;
        self.node.write_to_database(execute_op(sql, params)).await
    }

    /// Run a query on one backend chosen by the balancer.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.node.invoke(Method::Query, query_op(sql, params)).await
    }

    /// Run a locking query on every backend, so every backend holds the locks.
    pub async fn query_for_update(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.node.invoke(Method::QueryForUpdate, query_op(sql, params)).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.node.invoke(Method::Commit, operation(|_, conn: Arc<dyn Connection>| async move {
            conn.commit().await
        })).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.node.invoke(Method::Rollback, operation(|_, conn: Arc<dyn Connection>| async move {
            conn.rollback().await
        })).await
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.node.invoke(Method::SetAutoCommit, operation(move |_, conn: Arc<dyn Connection>| async move {
            conn.set_auto_commit(auto_commit).await
        })).await
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.node.invoke(Method::SetReadOnly, operation(move |_, conn: Arc<dyn Connection>| async move {
            conn.set_read_only(read_only).await
        })).await
    }

    pub async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.node.invoke(Method::SetIsolationLevel, operation(move |_, conn: Arc<dyn Connection>| async move {
            conn.set_isolation_level(level).await
        })).await
    }

    pub async fn auto_commit(&self) -> Result<bool> {
        self.node.invoke(Method::AutoCommit, operation(|_, conn: Arc<dyn Connection>| async move {
            Ok(conn.auto_commit())
        })).await
    }

    pub async fn isolation_level(&self) -> Result<IsolationLevel> {
        self.node.invoke(Method::IsolationLevel, operation(|_, conn: Arc<dyn Connection>| async move {
            Ok(conn.isolation_level())
        })).await
    }

    pub async fn metadata(&self) -> Result<DatabaseMetaData> {
        self.node.invoke(Method::Metadata, operation(|_, conn: Arc<dyn Connection>| async move {
            conn.metadata().await
        })).await
    }

    /// Prepare sql on every active backend.
    pub async fn prepare(&self, sql: &str) -> Result<ProxyStatement> {
        self.node.check_open()?;
        let parent: Arc<dyn Parent<dyn Connection>> = self.node.clone();
        let text: Arc<str> = sql.into();
        let node = Multiplexer::new(
            parent,
            operation(move |_, conn: Arc<dyn Connection>| {
                let sql = text.clone();
                async move { conn.prepare(&sql).await }
            }),
            operation(|_, stmt: Arc<dyn PreparedStatement>| async move { stmt.close().await }),
        );
        let handles = node.handles(&self.cluster().active_backends()).await;
        if handles.is_empty() {
            return Err(Error::no_active_backends());
        }
        Ok(ProxyStatement::new(sql, node))
    }

    /// Close the native connections. Statements prepared on this connection are closed too.
    pub async fn close(&self) {
        self.node.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }
}

fn execute_op(sql: &str, params: &[Value]) -> Operation<dyn Connection, u64> {
    let sql: Arc<str> = sql.into();
    let params: Arc<[Value]> = params.into();
    operation(move |_, conn: Arc<dyn Connection>| {
        let (sql, params) = (sql.clone(), params.clone());
        async move { conn.execute(&sql, &params).await }
    })
}

fn query_op(sql: &str, params: &[Value]) -> Operation<dyn Connection, Vec<Row>> {
    let sql: Arc<str> = sql.into();
    let params: Arc<[Value]> = params.into();
    operation(move |_, conn: Arc<dyn Connection>| {
        let (sql, params) = (sql.clone(), params.clone());
        async move { conn.query(&sql, &params).await }
    })
}
