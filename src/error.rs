use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for the ingest and consolidation pipeline.
///
/// Parse failures are recovered per-message by the subscriber; broker
/// failures terminate the process (the supervisor restarts it); integrity
/// failures abort the current batch and surface to whatever triggered it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed feed message: {0}")]
    MalformedMessage(String),

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("broker heartbeat timeout: {0}")]
    HeartbeatTimeout(String),

    #[error("broker connection closed: {0}")]
    Disconnected(String),

    #[error("duplicate day records remain after deduplication: {0}")]
    ConsolidationInvariantViolation(String),

    #[error("duplicate day records remain after pruning: {0}")]
    PruneInvariantViolation(String),

    #[error("expected spool file missing: {}", .0.display())]
    MissingSourceFile(PathBuf),

    #[error("spool io: {0}")]
    Io(#[from] std::io::Error),

    #[error("spool encoding: {0}")]
    Csv(#[from] csv::Error),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}
