use strum::Display;

use crate::mirrordb::proxy::DispatchPolicy;


/// The proxied methods of connections and prepared statements. Creating and closing
/// handles isn't dispatched, it's part of the handle tree itself.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum Method {
    // Connection
    Execute,
    Query,
    QueryForUpdate,
    Commit,
    Rollback,
    SetAutoCommit,
    SetReadOnly,
    SetIsolationLevel,
    AutoCommit,
    IsolationLevel,
    Metadata,
    // PreparedStatement
    StatementExecute,
    StatementQuery,
    SetMaxRows,
    SetQueryTimeout,
    MaxRows,
}

impl Method {
    /// Returns how calls to this method are dispatched to the backends.
    pub fn policy(self) -> DispatchPolicy {
        use DispatchPolicy::*;
        match self {
            Method::AutoCommit | Method::IsolationLevel | Method::MaxRows => ReadFromDriver,
            Method::Query | Method::Metadata | Method::StatementQuery => ReadFromDatabase,
            Method::SetAutoCommit | Method::SetReadOnly | Method::SetIsolationLevel
            | Method::SetMaxRows | Method::SetQueryTimeout => WriteToDriver,
            // a locking read has to take its locks on every backend
            Method::Execute | Method::QueryForUpdate | Method::Commit | Method::Rollback
            | Method::StatementExecute => WriteToDatabase,
        }
    }
}
