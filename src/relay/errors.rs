// Error types for the relay pipeline

use std::time::Duration;

use thiserror::Error;

/// Failure while fetching one memory from its source URL.
///
/// All variants are terminal for the item only; the run keeps going.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Source answered with a non-success status code.
    #[error("source returned HTTP {0}")]
    Status(u16),

    /// The attempt did not complete within the per-attempt timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (DNS, TLS, reset, ...).
    #[error("network error: {0}")]
    Network(String),

    /// Could not persist the payload to the scratch directory.
    #[error("scratch file error: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Failure reported by the chat transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The chat API rejected the call.
    #[error("chat API error: {0}")]
    Api(String),

    /// The target message can no longer be edited (too old, deleted, or
    /// unchanged). Callers treat this as a no-op.
    #[error("message can no longer be edited")]
    StaleMessage,

    /// Connection-level failure talking to the chat API.
    #[error("network error: {0}")]
    Network(String),

    /// Local file handed to the transport could not be read.
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failure delivering one fetched memory after retry exhaustion.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct RelayError(#[from] pub TransportError);

/// Rejection raised by the per-user session state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A run is active for this chat; new documents are rejected, never
    /// queued.
    #[error("a transfer is already running for this chat")]
    Busy,
}
