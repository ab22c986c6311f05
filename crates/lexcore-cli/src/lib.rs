// lexcore CLI library

pub mod commands;
pub mod logging;

pub use commands::{execute, load_config, Cli, Commands};
pub use logging::init_logging;
