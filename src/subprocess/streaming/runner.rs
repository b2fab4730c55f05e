//! Stream watchers feeding a child's output through the demultiplexer

use super::demux::LineDemultiplexer;
use super::types::{DemuxEvent, LineOutcome};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Read size for stderr chunks
const CHUNK_SIZE: usize = 8192;

/// Normalize a line by removing one trailing terminator (`\n`, `\r\n` or a
/// lone `\r` left at end of stream)
pub fn normalize_line(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
    }
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

/// Feed stdout to the demultiplexer line by line.
///
/// Stops after the first terminal event: a result or a sink failure. Bytes
/// that are not valid UTF-8 are replaced rather than ending the stream.
pub async fn watch_stdout<R>(stream: R, demux: Arc<LineDemultiplexer>, events: mpsc::Sender<DemuxEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!("Handler stdout closed");
                return;
            }
            Ok(_) => {
                let line = normalize_line(String::from_utf8_lossy(&buf).into_owned());
                let event = match demux.process_line(&line).await {
                    Ok(LineOutcome::Forwarded) => continue,
                    Ok(LineOutcome::Result(value)) => DemuxEvent::Resolved(value),
                    Err(e) => DemuxEvent::Failed(e),
                };
                // A closed receiver means the invocation has already ended.
                let _ = events.send(event).await;
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to read handler stdout: {}", e);
                return;
            }
        }
    }
}

/// Forward stderr to the demultiplexer as raw chunks.
pub async fn watch_stderr<R>(mut stream: R, demux: Arc<LineDemultiplexer>, events: mpsc::Sender<DemuxEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Handler stderr closed");
                return;
            }
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                if let Err(e) = demux.process_chunk(&chunk).await {
                    let _ = events.send(DemuxEvent::Failed(e)).await;
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read handler stderr: {}", e);
                return;
            }
        }
    }
}

/// The pair of watcher tasks attached to one child
pub struct StreamWatchers {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl StreamWatchers {
    /// Spawn both watchers. They report terminal events on `events`.
    pub fn attach<O, E>(
        stdout: O,
        stderr: E,
        demux: Arc<LineDemultiplexer>,
        events: mpsc::Sender<DemuxEvent>,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let stdout = tokio::spawn(watch_stdout(stdout, Arc::clone(&demux), events.clone()));
        let stderr = tokio::spawn(watch_stderr(stderr, demux, events));
        Self { stdout, stderr }
    }

    /// Stop both watchers. Output arriving afterwards is never looked at.
    pub fn detach(self) {
        self.stdout.abort();
        self.stderr.abort();
    }
}
