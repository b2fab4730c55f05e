//! Core types for handler output streaming

use serde_json::Value;

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSource::Stdout => "stdout",
            StreamSource::Stderr => "stderr",
        }
    }
}

/// Terminal event reported by a stream watcher
#[derive(Debug)]
pub enum DemuxEvent {
    /// A result envelope was found on stdout
    Resolved(Value),
    /// Forwarding output to the notice sink failed
    Failed(anyhow::Error),
}

/// Outcome of classifying one stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Every sub-line was incidental output and has been forwarded
    Forwarded,
    /// A sub-line carried the result; later sub-lines were not looked at
    Result(Value),
}
