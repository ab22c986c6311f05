// Tracing subscriber setup for the lexcore binary

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, otherwise the configured level
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the fmt subscriber on stderr
///
/// Stdout carries command output only. Later calls are ignored.
pub fn init_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
