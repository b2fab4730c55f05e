//! Subprocess plumbing for handler invocations
//!
//! - `runner` builds the child environment, resolves the interpreter and
//!   spawns the child with piped stdio.
//! - `streaming` demultiplexes the child's output into a result and notices.

pub mod error;
pub mod runner;
pub mod streaming;


pub use error::ProcessError;
pub use runner::{ambient_environment, child_environment, spawn_piped, ProcessCommand};
