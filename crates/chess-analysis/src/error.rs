//! Error types shared across the analysis pipeline.

use std::time::Duration;
use thiserror::Error;

/// Failures of a single protocol session with an engine process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The engine process exited or its streams were closed.
    #[error("Engine channel closed: {0}")]
    Closed(String),
    /// No terminating line arrived within the allotted time.
    #[error("Engine did not answer within {0:?}")]
    Timeout(Duration),
    /// The engine never completed the `uci`/`isready` negotiation.
    #[error("Engine handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Errors surfaced by workers, the pool and the cache.
///
/// Cloneable so one failed computation can be reported to every caller
/// that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A worker failed twice in a row on the same request.
    #[error("Evaluation failed on worker {worker}: {reason}")]
    EvaluationFailed { worker: usize, reason: String },
    /// No healthy worker became available within the allotted wait.
    #[error("No engine worker available after {0:?}")]
    PoolExhausted(Duration),
    /// The pool was shut down.
    #[error("Engine pool is shut down")]
    PoolClosed,
    /// No worker could be started at all.
    #[error("Failed to start engine pool: {0}")]
    Startup(String),
}

impl EngineError {
    /// True for failures that concern the whole pool rather than one request.
    pub fn is_pool_wide(&self) -> bool {
        matches!(self, EngineError::PoolExhausted(_) | EngineError::PoolClosed | EngineError::Startup(_))
    }
}

/// Errors from the chess rules capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },
    #[error("Unparseable move '{0}'")]
    InvalidMove(String),
    #[error("Illegal move '{mv}' in position {fen}")]
    IllegalMove { mv: String, fen: String },
}

/// Failures of a durable evaluation or statistics store.
#[derive(Error, Debug)]
#[error("Store error: {0}")]
pub struct StoreError(pub String);

/// Errors that can occur during game analysis.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Invalid game data was provided.
    #[error("Invalid game data: {0}")]
    InvalidGame(String),
    /// Classification or summary settings are inconsistent.
    #[error("Invalid analysis configuration: {0}")]
    InvalidConfig(String),
}
