mod config;
mod cluster;
mod load;

pub use self::config::*;
pub use self::cluster::*;
pub use self::load::{load_config, load_config_str};
pub(crate) use self::load::replace_env_vars;
