mod cluster;
mod registry;
mod state;

pub use self::cluster::Cluster;
pub use self::registry::{ClusterRegistry, Connectors};
pub use self::state::StateStore;
