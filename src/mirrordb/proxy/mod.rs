mod multiplexer;
mod dispatch;
mod method;
mod data_source;
mod connection;
mod statement;

pub use self::multiplexer::{operation, Multiplexer, Operation, Parent};
pub use self::dispatch::DispatchPolicy;
pub use self::method::Method;
pub use self::data_source::DataSource;
pub use self::connection::{ConnectionNode, ProxyConnection};
pub use self::statement::{ProxyStatement, StatementNode};
