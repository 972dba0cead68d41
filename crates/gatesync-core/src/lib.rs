pub mod config;
pub mod labels;

pub use config::{ConfigError, GatesyncConfig};
