//! Error handling utilities

use tracing::error;

/// Report a fatal error and exit with the matching status code.
///
/// `RunnerError`s print their user message, plus the full chain in
/// verbose mode. Anything else exits with 1.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    use crate::error::RunnerError;

    error!("Fatal error: {}", error);

    let exit_code = if let Some(runner_err) = error.downcast_ref::<RunnerError>() {
        eprintln!("Error: {}", runner_err.user_message());
        runner_err.exit_code()
    } else {
        eprintln!("Error: {error}");
        1
    };

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code)
}
