//! Error types for the collaborator seams.

use crate::protocol::EntryId;

/// Persistent state store failures. Logged by the coordinator, never surfaced
/// as playback failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to (de)serialize stored state: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to prepare storage location: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence worker is not running")]
    WorkerUnavailable,
    #[error("persistence worker did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Failures reported by an audio output binding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    /// The local handle became invalid or expired; re-acquisition may help.
    #[error("local handle for entry {entry_id} is no longer valid")]
    HandleInvalid { entry_id: EntryId },
}

/// Wire decoding failures. Malformed commands are ignored by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
