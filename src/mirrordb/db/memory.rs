use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::atomic::Ordering::{Relaxed, Acquire, Release};
use std::time::Duration;

use fnv::FnvHashMap;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::mirrordb::{Error, Result};
use crate::mirrordb::db::{
    Connector, Connection, PreparedStatement, ConnectionParams, RowStream,
    Value, Row, IsolationLevel, DatabaseMetaData, TableMetaData, ForeignKey,
};


static SELECT_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*select\s+\*\s+from\s+([A-Za-z_][A-Za-z0-9_.]*)\s*;?\s*$").expect("valid select regex")
});

/// MemoryConnector hands out connections to named in-process databases.
/// The database is selected with the "database" connection parameter and
/// created empty on first use.
#[derive(Default)]
pub struct MemoryConnector {
    databases: Mutex<FnvHashMap<String, MemoryDatabase>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named database, creating it if it doesn't exist.
    pub fn database(&self, name: &str) -> MemoryDatabase {
        let mut databases = self.databases.lock().unwrap_or_else(|e| e.into_inner());
        databases.entry(name.to_string())
            .or_insert_with(|| MemoryDatabase::new(name))
            .clone()
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, params: &'a ConnectionParams) -> BoxFuture<'a, Result<Arc<dyn Connection>>> {
        Box::pin(async move {
            let name = params.get("database")
                .ok_or_else(|| Error::new("memory connector requires a database parameter"))?;
            self.database(name).connect().await
        })
    }
}

#[derive(Clone)]
struct MemoryTable {
    meta: TableMetaData,
    rows: BTreeMap<Row, Row>, // keyed by primary key
}

type Tables = BTreeMap<String, MemoryTable>;

struct Shared {
    name: String,
    tables: Mutex<Tables>,
    online: AtomicBool,
    reject: Mutex<Option<Regex>>,
    latency_ms: AtomicU64,
    statements: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

/// MemoryDatabase is a small in-process database. Tables are keyed by primary key,
/// transactions are whole-database snapshots, and it can be switched offline or
/// told to reject statements to simulate backend failures.
#[derive(Clone)]
pub struct MemoryDatabase(Arc<Shared>);

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        MemoryDatabase(Arc::new(Shared {
            name: name.to_string(),
            tables: Mutex::new(BTreeMap::new()),
            online: AtomicBool::new(true),
            reject: Mutex::new(None),
            latency_ms: AtomicU64::new(0),
            statements: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn set_online(&self, online: bool) {
        self.0.online.store(online, Release);
    }

    pub fn is_online(&self) -> bool {
        self.0.online.load(Acquire)
    }

    /// Reject every statement matching the regex pattern (None clears it). Rejections
    /// happen while the database is online, so probes still succeed.
    pub fn reject_statements(&self, pattern: Option<&str>) -> Result<()> {
        let re = pattern.map(Regex::new).transpose().map_err(Error::new)?;
        *self.0.reject.lock()? = re;
        Ok(())
    }

    /// Delay every statement by latency.
    pub fn set_latency(&self, latency: Duration) {
        self.0.latency_ms.store(latency.as_millis() as u64, Relaxed);
    }

    /// Returns a copy of the log of statements executed so far.
    pub fn statements(&self) -> Vec<String> {
        self.0.statements.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_statements(&self, stmt: &str) -> usize {
        self.0.statements.lock().unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.as_str() == stmt)
            .count()
    }

    /// Returns the number of connections opened so far.
    pub fn connections(&self) -> usize {
        self.0.connections.load(Relaxed)
    }

    pub fn create_table(&self, meta: TableMetaData) {
        let mut tables = self.0.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.insert(meta.name.clone(), MemoryTable { meta, rows: BTreeMap::new() });
    }

    /// Writes rows directly, bypassing statement checks and the statement log.
    pub fn put_rows(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let mut tables = self.0.tables.lock()?;
        let t = tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
        for row in rows {
            let key = t.meta.key(&row);
            t.rows.insert(key, row);
        }
        Ok(())
    }

    /// Returns the rows of table in primary key order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.0.tables.lock()?;
        let t = tables.get(table).ok_or_else(|| no_such_table(table))?;
        Ok(t.rows.values().cloned().collect())
    }

    pub fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let tables = self.0.tables.lock()?;
        let t = tables.get(table).ok_or_else(|| no_such_table(table))?;
        Ok(t.meta.foreign_keys.clone())
    }

    pub async fn connect(&self) -> Result<Arc<dyn Connection>> {
        self.pause().await;
        if !self.is_online() {
            return Err(self.refused());
        }
        self.0.connections.fetch_add(1, Relaxed);
        debug!(database = %self.name(), "opened memory connection");
        Ok(Arc::new(MemoryConnection {
            db: self.clone(),
            auto_commit: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
            isolation: Mutex::new(IsolationLevel::default()),
            snapshot: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn pause(&self) {
        let ms = self.0.latency_ms.load(Relaxed);
        if ms != 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn refused(&self) -> Error {
        Error::new(format!("{}: connection refused", self.name()))
    }

    /// check fails if the database is offline or the statement is rejected,
    /// otherwise it appends the statement to the log.
    fn check(&self, stmt: String) -> Result<()> {
        if !self.is_online() {
            return Err(self.refused());
        }
        if let Some(re) = self.0.reject.lock()?.as_ref() {
            if re.is_match(&stmt) {
                return Err(Error::new(format!("{}: statement rejected: {}", self.name(), stmt)));
            }
        }
        self.0.statements.lock()?.push(stmt);
        Ok(())
    }

    /// run_query answers a full table select with the table's rows in key order.
    /// Any other query returns a single row holding the database name.
    fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.check(sql.to_string())?;
        if let Some(caps) = SELECT_TABLE.captures(sql) {
            let tables = self.0.tables.lock()?;
            let t = tables.get(&caps[1]).ok_or_else(|| no_such_table(&caps[1]))?;
            return Ok(t.rows.values().cloned().collect());
        }
        Ok(vec![vec![Value::Text(self.name().to_string())]])
    }
}

fn no_such_table(name: &str) -> Error {
    Error::new(format!("table {} does not exist", name))
}

fn table_mut<'t>(tables: &'t mut Tables, name: &str) -> Result<&'t mut MemoryTable> {
    tables.get_mut(name).ok_or_else(|| no_such_table(name))
}

struct MemoryConnection {
    db: MemoryDatabase,
    auto_commit: AtomicBool,
    read_only: AtomicBool,
    isolation: Mutex<IsolationLevel>,
    // The state of the database when the current transaction started
    snapshot: Mutex<Option<Tables>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Acquire) {
            Err(Error::closed())
        } else {
            Ok(())
        }
    }

    /// with_tables runs f against the database tables after checking stmt.
    /// Outside of auto-commit mode the first call of a transaction takes a snapshot.
    fn with_tables<'a, T, F>(&'a self, stmt: String, f: F) -> BoxFuture<'a, Result<T>>
        where T: Send + 'a,
              F: FnOnce(&mut Tables) -> Result<T> + Send + 'a
    {
        Box::pin(async move {
            self.db.pause().await;
            self.check_open()?;
            self.db.check(stmt)?;
            let mut tables = self.db.0.tables.lock()?;
            if !self.auto_commit.load(Acquire) {
                let mut snapshot = self.snapshot.lock()?;
                if snapshot.is_none() {
                    *snapshot = Some(tables.clone());
                }
            }
            f(&mut *tables)
        })
    }

    fn end_transaction(&self, stmt: &'static str, restore: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.db.pause().await;
            self.check_open()?;
            self.db.check(stmt.to_string())?;
            let mut tables = self.db.0.tables.lock()?;
            let mut snapshot = self.snapshot.lock()?;
            if let Some(saved) = snapshot.take() {
                if restore {
                    *tables = saved;
                }
            }
            Ok(())
        })
    }

    fn set(&self, stmt: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_open()?;
            self.db.check(stmt)
        })
    }
}

impl Connection for MemoryConnection {
    fn probe<'a>(&'a self, _query: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.db.pause().await;
            if self.db.is_online() {
                Ok(())
            } else {
                Err(self.db.refused())
            }
        })
    }

    fn execute<'a>(&'a self, sql: &'a str, _params: &'a [Value]) -> BoxFuture<'a, Result<u64>> {
        self.with_tables(sql.to_string(), |_| Ok(1))
    }

    fn query<'a>(&'a self, sql: &'a str, _params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            self.db.pause().await;
            self.check_open()?;
            self.db.run_query(sql)
        })
    }

    fn prepare<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Arc<dyn PreparedStatement>>> {
        Box::pin(async move {
            self.check_open()?;
            self.db.check(format!("PREPARE {}", sql))?;
            Ok(Arc::new(MemoryStatement {
                db: self.db.clone(),
                sql: sql.to_string(),
                max_rows: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }) as Arc<dyn PreparedStatement>)
        })
    }

    fn set_auto_commit(&self, auto_commit: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.set(format!("SET AUTOCOMMIT {}", auto_commit)).await?;
            if auto_commit {
                // Switching auto-commit on commits the current transaction
                self.snapshot.lock()?.take();
            }
            self.auto_commit.store(auto_commit, Release);
            Ok(())
        })
    }

    fn set_read_only(&self, read_only: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.set(format!("SET READ ONLY {}", read_only)).await?;
            self.read_only.store(read_only, Release);
            Ok(())
        })
    }

    fn set_isolation_level(&self, level: IsolationLevel) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.set(format!("SET ISOLATION {}", level)).await?;
            *self.isolation.lock()? = level;
            Ok(())
        })
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Acquire)
    }

    fn isolation_level(&self) -> IsolationLevel {
        *self.isolation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        self.end_transaction("COMMIT", false)
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        self.end_transaction("ROLLBACK", true)
    }

    fn metadata(&self) -> BoxFuture<'_, Result<DatabaseMetaData>> {
        Box::pin(async move {
            self.db.pause().await;
            self.check_open()?;
            if !self.db.is_online() {
                return Err(self.db.refused());
            }
            let tables = self.db.0.tables.lock()?;
            Ok(DatabaseMetaData {
                tables: tables.values().map(|t| t.meta.clone()).collect(),
            })
        })
    }

    fn lock_table<'a>(&'a self, table: &'a TableMetaData) -> BoxFuture<'a, Result<()>> {
        self.with_tables(format!("SELECT * FROM {} FOR UPDATE", table.name), move |tables| {
            table_mut(tables, &table.name).map(|_| ())
        })
    }

    fn scan<'a>(&'a self, table: &'a TableMetaData) -> BoxFuture<'a, Result<RowStream>> {
        Box::pin(async move {
            let rows = self.with_tables(format!("SELECT * FROM {} ORDER BY KEY", table.name), move |tables| {
                Ok(table_mut(tables, &table.name)?.rows.values().cloned().collect::<Vec<_>>())
            }).await?;
            Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
        })
    }

    fn insert<'a>(&'a self, table: &'a TableMetaData, rows: &'a [Row]) -> BoxFuture<'a, Result<u64>> {
        self.with_tables(format!("INSERT INTO {}", table.name), move |tables| {
            let t = table_mut(tables, &table.name)?;
            for row in rows {
                let key = t.meta.key(row);
                if t.rows.contains_key(&key) {
                    return Err(Error::new(format!("duplicate key {:?} in table {}", key, table.name)));
                }
                t.rows.insert(key, row.clone());
            }
            Ok(rows.len() as u64)
        })
    }

    fn update<'a>(&'a self, table: &'a TableMetaData, rows: &'a [Row]) -> BoxFuture<'a, Result<u64>> {
        self.with_tables(format!("UPDATE {}", table.name), move |tables| {
            let t = table_mut(tables, &table.name)?;
            let mut updated = 0;
            for row in rows {
                if let Some(existing) = t.rows.get_mut(&t.meta.key(row)) {
                    *existing = row.clone();
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    fn delete<'a>(&'a self, table: &'a TableMetaData, keys: &'a [Row]) -> BoxFuture<'a, Result<u64>> {
        self.with_tables(format!("DELETE FROM {} WHERE KEY", table.name), move |tables| {
            let t = table_mut(tables, &table.name)?;
            Ok(keys.iter().filter(|key| t.rows.remove(*key).is_some()).count() as u64)
        })
    }

    fn delete_all<'a>(&'a self, table: &'a TableMetaData) -> BoxFuture<'a, Result<u64>> {
        self.with_tables(format!("DELETE FROM {}", table.name), move |tables| {
            let t = table_mut(tables, &table.name)?;
            let n = t.rows.len() as u64;
            t.rows.clear();
            Ok(n)
        })
    }

    fn drop_foreign_key<'a>(&'a self, fk: &'a ForeignKey) -> BoxFuture<'a, Result<()>> {
        self.with_tables(format!("ALTER TABLE {} DROP CONSTRAINT {}", fk.table, fk.name), move |tables| {
            let t = table_mut(tables, &fk.table)?;
            let before = t.meta.foreign_keys.len();
            t.meta.foreign_keys.retain(|existing| existing.name != fk.name);
            if t.meta.foreign_keys.len() == before {
                return Err(Error::new(format!("constraint {} does not exist", fk.name)));
            }
            Ok(())
        })
    }

    fn create_foreign_key<'a>(&'a self, fk: &'a ForeignKey) -> BoxFuture<'a, Result<()>> {
        self.with_tables(format!("ALTER TABLE {} ADD CONSTRAINT {}", fk.table, fk.name), move |tables| {
            let t = table_mut(tables, &fk.table)?;
            if t.meta.foreign_keys.iter().any(|existing| existing.name == fk.name) {
                return Err(Error::new(format!("constraint {} already exists", fk.name)));
            }
            t.meta.foreign_keys.push(fk.clone());
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.closed.swap(true, Release) {
                // Closing without committing discards the open transaction
                let mut tables = self.db.0.tables.lock()?;
                if let Some(saved) = self.snapshot.lock()?.take() {
                    *tables = saved;
                }
            }
            Ok(())
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }
}

struct MemoryStatement {
    db: MemoryDatabase,
    sql: String,
    max_rows: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStatement {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Acquire) {
            Err(Error::closed())
        } else {
            Ok(())
        }
    }
}

impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn execute<'a>(&'a self, _params: &'a [Value]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.db.pause().await;
            self.check_open()?;
            self.db.check(self.sql.clone())?;
            Ok(1)
        })
    }

    fn query<'a>(&'a self, _params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            self.db.pause().await;
            self.check_open()?;
            let mut rows = self.db.run_query(&self.sql)?;
            let max_rows = self.max_rows.load(Acquire);
            if max_rows != 0 {
                rows.truncate(max_rows);
            }
            Ok(rows)
        })
    }

    fn set_max_rows(&self, max_rows: usize) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_open()?;
            self.db.check(format!("SET MAX ROWS {}", max_rows))?;
            self.max_rows.store(max_rows, Release);
            Ok(())
        })
    }

    fn set_query_timeout(&self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_open()?;
            self.db.check(format!("SET QUERY TIMEOUT {}", timeout.as_secs()))
        })
    }

    fn max_rows(&self) -> usize {
        self.max_rows.load(Acquire)
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.closed.store(true, Release);
            Ok(())
        })
    }
}
