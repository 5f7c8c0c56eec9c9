//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by every chronicle crate.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate has no handler registered for an event's derived name.
    #[error("aggregate {aggregate_type} has no method {handler} to apply the event")]
    NoHandlerFound {
        /// The aggregate kind that received the event.
        aggregate_type: String,
        /// The handler name derived from the payload type (`apply<Name>`).
        handler: String,
    },

    /// Another writer already extended this aggregate stream.
    #[error(
        "concurrency conflict on {aggregate_type} {aggregate_id}: sequence number \
         {sequence_number} already stored (reload and retry)"
    )]
    ConcurrencyConflict {
        /// The aggregate kind.
        aggregate_type: String,
        /// The aggregate instance.
        aggregate_id: String,
        /// The sequence number both writers tried to claim.
        sequence_number: i64,
    },

    /// An event container was used in a way its lifecycle does not allow.
    #[error("invalid event container state: {0}")]
    InvalidContainerState(String),

    /// No stored record carries the given event id.
    #[error("record for event {0} not found")]
    NotFound(Uuid),

    /// The storage collaborator failed.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// A payload, metadata blob, or stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Historical events handed to an aggregate are not a valid stream for it.
    #[error("invalid event history: {0}")]
    InvalidHistory(String),

    /// The identity map already tracks an aggregate with this identity.
    #[error("aggregate {aggregate_type} {aggregate_id} is already tracked in this unit of work")]
    AlreadyTracked {
        /// The aggregate kind.
        aggregate_type: String,
        /// The aggregate instance.
        aggregate_id: String,
    },
}

impl DomainError {
    /// Returns `true` when reloading the aggregate and retrying the command
    /// may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
