use std::sync::Arc;
use std::time::Duration;

use crate::mirrordb::Result;
use crate::mirrordb::db::{Connection, PreparedStatement, Row, Value};
use crate::mirrordb::proxy::{operation, Method, Multiplexer};


pub type StatementNode = Multiplexer<dyn Connection, dyn PreparedStatement>;

/// ProxyStatement is a statement prepared on every active backend.
pub struct ProxyStatement {
    sql: String,
    node: Arc<StatementNode>,
}

impl ProxyStatement {
    pub(crate) fn new(sql: &str, node: Arc<StatementNode>) -> Self {
        Self { sql: sql.to_string(), node }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn node(&self) -> &Arc<StatementNode> {
        &self.node
    }

    pub async fn execute(&self, params: &[Value]) -> Result<u64> {
        let params: Arc<[Value]> = params.into();
        self.node.invoke(Method::StatementExecute, operation(move |_, stmt: Arc<dyn PreparedStatement>| {
            let params = params.clone();
            async move { stmt.execute(&params).await }
        })).await
    }

    pub async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        let params: Arc<[Value]> = params.into();
        self.node.invoke(Method::StatementQuery, operation(move |_, stmt: Arc<dyn PreparedStatement>| {
            let params = params.clone();
            async move { stmt.query(&params).await }
        })).await
    }

    /// Limit the rows returned by query, 0 is unlimited.
    pub async fn set_max_rows(&self, max_rows: usize) -> Result<()> {
        self.node.invoke(Method::SetMaxRows, operation(move |_, stmt: Arc<dyn PreparedStatement>| async move {
            stmt.set_max_rows(max_rows).await
        })).await
    }

    pub async fn set_query_timeout(&self, timeout: Duration) -> Result<()> {
        self.node.invoke(Method::SetQueryTimeout, operation(move |_, stmt: Arc<dyn PreparedStatement>| async move {
            stmt.set_query_timeout(timeout).await
        })).await
    }

    pub async fn max_rows(&self) -> Result<usize> {
        self.node.invoke(Method::MaxRows, operation(|_, stmt: Arc<dyn PreparedStatement>| async move {
            Ok(stmt.max_rows())
        })).await
    }

    pub async fn close(&self) {
        self.node.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }
}
