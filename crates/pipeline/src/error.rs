//! Pipeline error types.

use thiserror::Error;

use certhunt_eisenbahn::EisenbahnError;
use certhunt_rules::RuleError;

/// Fatal errors surfaced by pipeline setup or shutdown.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("rule error: {0}")]
    Rules(#[from] RuleError),

    #[error("dedup store error: {0}")]
    Store(#[from] StoreError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("broadcast error: {0}")]
    Broadcast(#[from] EisenbahnError),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors reported by a stream source. These are logged, never fatal.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("undecodable stream message: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Dedup store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Durable log and broadcast failures inside the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("attribute log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("attribute serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broadcast error: {0}")]
    Broadcast(#[from] EisenbahnError),
}
