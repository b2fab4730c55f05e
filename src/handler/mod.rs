//! Handler invocation through a child interpreter
//!
//! [`HandlerRunner`] supervises one child per invocation: it spawns the
//! interpreter with the adapter script, feeds it the event and context,
//! and returns the value the handler produced.

pub mod runner;
pub mod state;

pub use runner::{interpreter_name, invocation_line, HandlerRunner};
pub use state::RunnerState;
