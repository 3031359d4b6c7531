mod config;
mod probe;

pub use config::cmd_config;
pub use probe::cmd_probe;
