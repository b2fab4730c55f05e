//! Notice sinks receiving everything a handler prints besides its result

use super::types::StreamSource;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Tracing target under which handler output is emitted.
pub const NOTICE_TARGET: &str = "handler_output";

/// Destination for incidental handler output
#[async_trait]
pub trait NoticeSink: Send + Sync {
    /// Forward one piece of output verbatim.
    ///
    /// An error here aborts the invocation that produced the output.
    async fn notice(&self, text: &str, source: StreamSource) -> Result<()>;
}

/// Sink that emits handler output as `tracing` events at notice level
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NoticeSink for TracingSink {
    async fn notice(&self, text: &str, source: StreamSource) -> Result<()> {
        tracing::info!(target: NOTICE_TARGET, source = source.as_str(), "{}", text);
        Ok(())
    }
}

/// Sink that keeps every notice in memory, in arrival order
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    notices: Arc<Mutex<Vec<(StreamSource, String)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded notices with their source
    pub fn notices(&self) -> Vec<(StreamSource, String)> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Recorded text from one source only
    pub fn lines_from(&self, source: StreamSource) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|(s, _)| *s == source)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl NoticeSink for RecordingSink {
    async fn notice(&self, text: &str, source: StreamSource) -> Result<()> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((source, text.to_string()));
        Ok(())
    }
}
