//! # handler-runner
//!
//! Run a function handler written in an interpreted language as a child
//! process and get its return value back.
//!
//! The child is started as `<interpreter> -u <adapter> <handler-path> <function>`
//! and receives `{"event": .., "context": ..}` as one line on stdin. The
//! adapter prints the handler's return value wrapped in
//! `{"__offline_payload__": <value>}`; anything else the handler prints is
//! forwarded to logging.
//!
//! ## Modules
//!
//! - `app` - Logging setup and fatal error handling for the binary
//! - `config` - Runner configuration and handler reference parsing
//! - `handler` - The per-invocation process supervisor
//! - `subprocess` - Process spawning and output demultiplexing
//!
//! ```no_run
//! use handler_runner::{HandlerRunner, RunnerConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), handler_runner::RunnerError> {
//! let runner = HandlerRunner::new(RunnerConfig::new("python3.12", "src/users.create"))?;
//! let result = runner.run(json!({"body": "{}"}), json!({})).await?;
//! runner.cleanup();
//! println!("{result}");
//! # Ok(())
//! # }
//! ```
pub mod app;
pub mod config;
pub mod error;
pub mod handler;
pub mod subprocess;

pub use config::{HandlerSpec, RunnerConfig};
pub use error::RunnerError;
pub use handler::{HandlerRunner, RunnerState};
pub use subprocess::streaming::{NoticeSink, RecordingSink, StreamSource, TracingSink};
