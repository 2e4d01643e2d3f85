// ABOUTME: Error taxonomy for the replication core
// ABOUTME: Separates retryable transport failures from fatal configuration and apply errors

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Errors surfaced by the streaming and apply paths.
///
/// The split matters for the consumer loop: recoverable errors send the
/// session into backoff and resume from the last persisted checkpoint, while
/// fatal errors terminate the process after cleanup and leave restarting to
/// external supervision.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Network-level failure worth retrying with backoff.
    #[error("transient connection failure: {0}")]
    TransientConnection(String),

    /// The bounded connect loop hit its attempt ceiling.
    #[error("connection attempts exhausted after {attempts} tries")]
    ConnectionExhausted { attempts: u32 },

    /// Bad address, credentials, slot, or publication. Retrying cannot help.
    #[error("permanent configuration error: {0}")]
    PermanentConfig(String),

    /// Unexpected message shape on the stream. The stream is restarted from
    /// the last persisted checkpoint.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A delete or upsert transaction failed and was rolled back in full.
    #[error("apply failed during {operation}: {source}")]
    Apply {
        operation: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] std::io::Error),
}

impl ReplicationError {
    /// Whether the consumer loop may recover by backing off and reconnecting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReplicationError::TransientConnection(_) | ReplicationError::Protocol(_)
        )
    }

    /// Classify a connection-time failure into transient vs. permanent.
    ///
    /// Server-reported authentication and catalog errors will not go away on
    /// retry; everything else (refused connections, resets, timeouts) is
    /// treated as transient.
    pub fn from_connect(err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(code)
                if *code == SqlState::INVALID_PASSWORD
                    || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
                    || *code == SqlState::UNDEFINED_DATABASE
                    || *code == SqlState::INSUFFICIENT_PRIVILEGE =>
            {
                ReplicationError::PermanentConfig(err.to_string())
            }
            _ => ReplicationError::TransientConnection(err.to_string()),
        }
    }

    /// Wrap a failed target transaction.
    pub fn apply(operation: &str, source: tokio_postgres::Error) -> Self {
        ReplicationError::Apply {
            operation: operation.to_string(),
            source,
        }
    }
}
