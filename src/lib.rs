pub mod mirrordb;
#[cfg(test)]
mod tests;

pub use crate::mirrordb::*;

use std::io;

use tokio::runtime::{Runtime, Builder};
use tracing_subscriber::FmtSubscriber;
use tracing::{info, Level};

use crate::mirrordb::config::{Settings, load_config};


pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than max_level will be written to stdout.
        .with_max_level(max_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from mirrordb.yaml
/// See mirrordb::config::load_config for more info.
pub fn init_settings() -> Result<Settings> {
    load_config("mirrordb.yaml")
}

pub fn init_runtime(conf: &Settings) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(conf.num_workers as usize)
        .enable_all()
        .build()
}

/// Build and start every configured cluster, then run until ctrl-c.
pub fn run(conf: &Settings, tokio: &Runtime) -> Result<()> {
    let registry = ClusterRegistry::new(conf, &Connectors::default())?;
    tokio.block_on(async {
        registry.start().await?;
        info!(config_path = %conf.config_path.display(), "mirrordb running, press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        registry.stop();
        Ok::<(), Error>(())
    })
}
