//! Error types for driftsync-engine.

use thiserror::Error;

/// Errors from the sync engine and its transfer collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The remote host could not be made reachable; fatal for one attempt.
    #[error("remote host unreachable: {0}")]
    HostUnreachable(String),

    /// The transfer executor reported failure (non-zero exit, network drop).
    /// Transient: the batch is re-queued by the coordinator.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The executor process could not be spawned at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
