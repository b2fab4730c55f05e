//! Result/notice demultiplexer for handler stdout
//!
//! A handler shares its stdout between whatever it prints and the single
//! line carrying its return value. The adapter wraps that value in an
//! object keyed by [`PAYLOAD_IDENTIFIER`]; every other line is forwarded to
//! the notice sink untouched.

use super::processor::NoticeSink;
use super::types::{LineOutcome, StreamSource};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

/// Key marking the result envelope. Shared with the adapter script.
pub const PAYLOAD_IDENTIFIER: &str = "__offline_payload__";

pub struct LineDemultiplexer {
    sink: Arc<dyn NoticeSink>,
    identifier: String,
}

impl LineDemultiplexer {
    pub fn new(sink: Arc<dyn NoticeSink>) -> Self {
        Self {
            sink,
            identifier: PAYLOAD_IDENTIFIER.to_string(),
        }
    }

    /// Use a different envelope key, for adapters that do not speak the default one
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Classify one stdout line.
    ///
    /// The line is split on embedded line terminators and the sub-lines are
    /// handled in order. The first sub-line holding a result envelope ends
    /// processing; everything before it goes to the sink.
    pub async fn process_line(&self, line: &str) -> Result<LineOutcome> {
        for item in split_sub_lines(line) {
            if let Some(value) = extract_envelope(item, &self.identifier) {
                tracing::debug!("Result envelope received ({} bytes)", item.len());
                return Ok(LineOutcome::Result(value));
            }
            self.sink.notice(item, StreamSource::Stdout).await?;
        }
        Ok(LineOutcome::Forwarded)
    }

    /// Forward one stderr chunk. Stderr is never inspected for results.
    pub async fn process_chunk(&self, chunk: &str) -> Result<()> {
        self.sink.notice(chunk, StreamSource::Stderr).await
    }
}

/// Split `text` on `\r\n`, `\n` and lone `\r`, keeping empty segments.
pub fn split_sub_lines(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(['\r', '\n']) {
        items.push(&rest[..pos]);
        let terminator = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[pos + terminator..];
    }
    items.push(rest);
    items
}

/// Return the envelope value if `item` is a JSON object owning `identifier`.
///
/// Key presence is what matters, so a `null` or `false` result still counts.
pub fn extract_envelope(item: &str, identifier: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(item) {
        Ok(Value::Object(mut map)) => map.remove(identifier),
        _ => None,
    }
}
