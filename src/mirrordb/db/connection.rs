use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::mirrordb::Result;
use crate::mirrordb::db::{Value, Row, IsolationLevel, DatabaseMetaData, TableMetaData, ForeignKey};


/// Connection parameters for a backend, passed through to its Connector untouched.
pub type ConnectionParams = BTreeMap<String, String>;

/// A stream of rows ordered by the table's primary key.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Connector creates native connections to a backend database.
/// It's the root of every backend's handle tree.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, params: &'a ConnectionParams) -> BoxFuture<'a, Result<Arc<dyn Connection>>>;
}

/// Connection is a native connection to a single backend database.
///
/// Besides executing client statements, a Connection exposes the primitives the
/// synchronization strategies are built from. How those map onto the backend's query
/// language is entirely up to the implementation.
pub trait Connection: Send + Sync {
    /// probe runs a trivial query to check the backend is alive
    fn probe<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<()>>;

    /// execute runs a statement that modifies the database, returning the affected row count
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>>;

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>>;

    fn prepare<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Arc<dyn PreparedStatement>>>;

    fn set_auto_commit(&self, auto_commit: bool) -> BoxFuture<'_, Result<()>>;

    fn set_read_only(&self, read_only: bool) -> BoxFuture<'_, Result<()>>;

    fn set_isolation_level(&self, level: IsolationLevel) -> BoxFuture<'_, Result<()>>;

    fn auto_commit(&self) -> bool;

    fn isolation_level(&self) -> IsolationLevel;

    fn commit(&self) -> BoxFuture<'_, Result<()>>;

    fn rollback(&self) -> BoxFuture<'_, Result<()>>;

    fn metadata(&self) -> BoxFuture<'_, Result<DatabaseMetaData>>;

    /// lock_table takes a transaction scoped lock on table via a locking read.
    /// The lock is released when the transaction ends.
    fn lock_table<'a>(&'a self, table: &'a TableMetaData) -> BoxFuture<'a, Result<()>>;

    /// scan streams every row of table in primary key order
    fn scan<'a>(&'a self, table: &'a TableMetaData) -> BoxFuture<'a, Result<RowStream>>;

    fn insert<'a>(&'a self, table: &'a TableMetaData, rows: &'a [Row]) -> BoxFuture<'a, Result<u64>>;

    /// update overwrites the rows with matching primary keys
    fn update<'a>(&'a self, table: &'a TableMetaData, rows: &'a [Row]) -> BoxFuture<'a, Result<u64>>;

    /// delete removes the rows with the given primary keys
    fn delete<'a>(&'a self, table: &'a TableMetaData, keys: &'a [Row]) -> BoxFuture<'a, Result<u64>>;

    fn delete_all<'a>(&'a self, table: &'a TableMetaData) -> BoxFuture<'a, Result<u64>>;

    fn drop_foreign_key<'a>(&'a self, fk: &'a ForeignKey) -> BoxFuture<'a, Result<()>>;

    fn create_foreign_key<'a>(&'a self, fk: &'a ForeignKey) -> BoxFuture<'a, Result<()>>;

    fn close(&self) -> BoxFuture<'_, Result<()>>;

    fn is_closed(&self) -> bool;
}

/// PreparedStatement is a native prepared statement on a single backend.
pub trait PreparedStatement: Send + Sync {
    fn sql(&self) -> &str;

    fn execute<'a>(&'a self, params: &'a [Value]) -> BoxFuture<'a, Result<u64>>;

    fn query<'a>(&'a self, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>>;

    fn set_max_rows(&self, max_rows: usize) -> BoxFuture<'_, Result<()>>;

    fn set_query_timeout(&self, timeout: Duration) -> BoxFuture<'_, Result<()>>;

    fn max_rows(&self) -> usize;

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}
