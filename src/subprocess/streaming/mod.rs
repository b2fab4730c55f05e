//! Real-time demultiplexing of handler output
//!
//! Stdout is read line by line and each line is classified as either the
//! handler's result envelope or incidental output. Stderr is read as raw
//! chunks and always treated as incidental. Incidental output goes to a
//! [`NoticeSink`].

pub mod demux;
pub mod processor;
pub mod runner;
pub mod types;


pub use demux::{extract_envelope, split_sub_lines, LineDemultiplexer, PAYLOAD_IDENTIFIER};
pub use processor::{NoticeSink, RecordingSink, TracingSink, NOTICE_TARGET};
pub use runner::{watch_stderr, watch_stdout, StreamWatchers};
pub use types::{DemuxEvent, LineOutcome, StreamSource};
