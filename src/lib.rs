pub mod riveradmin;
#[cfg(test)]
mod tests;

pub use crate::riveradmin::*;

use std::io;

use tokio::runtime::{Builder, Runtime};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::riveradmin::config::{Settings, load_config};


/// Write spans/events to stdout. RUST_LOG, if set, takes precedence over max_level.
pub fn init_tracing(max_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(max_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from riveradmin.yaml
/// See riveradmin::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("riveradmin.yaml")
}

/// The administrative tool is mostly waiting on the network, a small runtime is plenty.
pub fn init_runtime() -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
}
