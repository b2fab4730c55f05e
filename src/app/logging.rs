//! Logging configuration and initialization

use crate::app::config::AppConfig;
use tracing::{debug, trace};

/// Initialize tracing/logging for the application.
///
/// Logs go to stderr so that stdout carries only the handler result.
pub fn init_logging(config: &AppConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level())
        .with_writer(std::io::stderr)
        .with_target(config.verbose >= 1)
        .with_thread_ids(config.verbose >= 2)
        .with_line_number(config.verbose >= 2)
        .init();

    debug!("handler-runner started with verbosity level: {}", config.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}
