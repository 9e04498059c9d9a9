pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, get_config, set_config};
pub use error::{ColonyError, Result};
