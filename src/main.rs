use std::process::exit;

use tracing::{error, info, info_span, Level};

use riveradmin::config::Settings;
use riveradmin::metadata::CatalogStore;
use riveradmin::replicaset::describe_all;
use riveradmin::{init_runtime, init_settings, init_tracing, Result};


fn main() {
    init_tracing(Level::INFO);
    let _span = info_span!("startup").entered();

    let settings = match init_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!(%e, "could not load config");
            exit(1);
        }
    };
    let runtime = match init_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(%e, "could not start the tokio runtime");
            exit(1);
        }
    };

    match runtime.block_on(topology_yaml(settings)) {
        Ok(yaml) => print!("{}", yaml),
        Err(e) => {
            error!(%e, "could not describe the replica sets");
            exit(1);
        }
    }
}

/// The recorded topology of every replica set, as yaml.
async fn topology_yaml(settings: &'static Settings) -> Result<String> {
    let store = match &settings.metadata_path {
        Some(path) => CatalogStore::open(path)?,
        None => {
            info!("no metadata_path configured, the catalog is empty");
            CatalogStore::in_memory()
        }
    };
    let descriptions = describe_all(&store).await?;
    Ok(serde_yaml::to_string(&descriptions)?)
}
