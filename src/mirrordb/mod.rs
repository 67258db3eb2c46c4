pub mod common;
pub mod config;
pub mod db;
pub mod balancer;
pub mod lock;
pub mod sync;
pub mod cluster;
pub mod proxy;
mod backend;

pub use self::common::{Error, ErrorKind, Result};
pub use self::backend::Backend;
pub use self::cluster::{Cluster, ClusterRegistry, Connectors};
pub use self::proxy::{DataSource, ProxyConnection, ProxyStatement};
