mod config;
mod probe;
mod enums;
mod load;

pub use config::*;
pub use probe::*;
pub use enums::*;
pub use load::{load_config, load_config_from};
