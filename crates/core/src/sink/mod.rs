//! Trace persistence.
//!
//! A [`TraceSink`] receives the trace in three phases:
//! 1. [`TraceSink::begin`] once, with the process metadata and region snapshot;
//! 2. [`TraceSink::record`] for every appended record, in append order;
//! 3. [`TraceSink::finalize`] exactly once, with the complete trace.
//!
//! Streaming sinks ([`TextSink`]) write in phase 2 and only flush in phase 3.
//! Batch sinks ([`SqliteSink`]) ignore phase 2 and write everything at the end,
//! which requires the recorder to retain every record in memory.

pub mod format;
pub mod sqlite;
pub mod text;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RecordingPolicy;
use crate::model::{Trace, TraceRecord};

pub use sqlite::SqliteSink;
pub use text::TextSink;

/// Error type for sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error on {path}: {source}")]
    Io { path: String, source: std::io::Error },

    /// The recording policy cannot produce a store this sink can write.
    #[error("{sink} sink cannot be used with this recording policy: {reason}")]
    IncompatiblePolicy { sink: &'static str, reason: &'static str },

    /// A memory access does not resolve to the instruction it claims to come from.
    #[error(
        "Memory access #{index} at instruction {instruction_address:#x} does not match its parent instruction ({parent})"
    )]
    Correlation { index: usize, instruction_address: u64, parent: String },

    #[error("{sink} sink requires an output path")]
    MissingOutput { sink: &'static str },

    #[error("{sink} sink was already finalized")]
    AlreadyFinalized { sink: &'static str },
}

impl SinkError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SinkError::Io { path: path.as_ref().display().to_string(), source }
    }
}

/// Convenience result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// What a sink needs from the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkRequirements {
    /// Keep every record in the in-memory [`Trace`] until finalize.
    pub retain_records: bool,
    /// Every access must resolve to a recorded instruction at the same address.
    pub strict_correlation: bool,
}

/// Persistence backend for a trace.
pub trait TraceSink {
    /// Human-readable sink name, used in logs and errors.
    fn name(&self) -> &'static str;

    fn requirements(&self) -> SinkRequirements;

    /// Called once before any record, with the trace still empty.
    fn begin(&mut self, trace: &Trace) -> SinkResult<()>;

    /// Called after each record is appended.
    fn record(&mut self, _record: TraceRecord<'_>) -> SinkResult<()> {
        Ok(())
    }

    /// Write out the trace. Called exactly once per run.
    fn finalize(&mut self, trace: &Trace) -> SinkResult<()>;
}

/// Available sink implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Relational SQLite store.
    #[default]
    #[serde(alias = "relational")]
    Sqlite,
    /// Line-oriented text stream.
    Text,
}

impl SinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Sqlite => "sqlite",
            SinkKind::Text => "text",
        }
    }
}

/// Open the sink selected by `kind`.
///
/// The SQLite sink requires an output path; the text sink writes to standard
/// output when none is given.
pub fn open_sink(
    kind: SinkKind,
    output: Option<&Path>,
    policy: &RecordingPolicy,
) -> SinkResult<Box<dyn TraceSink>> {
    match kind {
        SinkKind::Sqlite => {
            let path: PathBuf = output
                .map(Path::to_path_buf)
                .ok_or(SinkError::MissingOutput { sink: "sqlite" })?;
            Ok(Box::new(SqliteSink::create(path, policy)?))
        }
        SinkKind::Text => match output {
            Some(path) => Ok(Box::new(TextSink::create(path)?)),
            None => Ok(Box::new(TextSink::stdout())),
        },
    }
}
