mod value;
mod metadata;
mod isolation;
mod connection;
mod memory;

pub use self::value::{rows_identical, Value, Row};
pub use self::metadata::{ColumnMetaData, ForeignKey, TableMetaData, DatabaseMetaData};
pub use self::isolation::IsolationLevel;
pub use self::connection::{Connector, Connection, PreparedStatement, ConnectionParams, RowStream};
pub use self::memory::{MemoryConnector, MemoryDatabase};
