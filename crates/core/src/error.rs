use thiserror::Error;

use crate::config::ConfigError;
use crate::recorder::RecorderError;
use crate::relocation::RelocationError;
use crate::sink::SinkError;

/// Umbrella error for a trace run.
///
/// Every variant is fatal for the run: the engine is expected to stop
/// delivering events once one is returned.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Relocation(#[from] RelocationError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// A line of a recorded event stream could not be decoded.
    #[error("Invalid engine event on line {line}: {source}")]
    Event { line: usize, source: serde_json::Error },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was already finalized; no further events are accepted.
    #[error("Trace session already finalized")]
    Finalized,
}

/// Convenience result type for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;
