//! Error types for chat-relay.

use thiserror::Error;

/// Main error type for all relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error on a socket, blob file, or snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (frame headers).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, unknown action, missing field).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Attempted to consume or peek more bytes than the buffer holds.
    #[error("Buffer underflow: need {needed} bytes, {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    /// Attempted to append more bytes than the buffer has room for.
    #[error("Buffer overflow: need {needed} bytes, {available} free")]
    BufferOverflow { needed: usize, available: usize },

    /// The operation requires a logged-in connection.
    #[error("Connection is not logged in")]
    NotLoggedIn,

    /// A named user does not exist.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Registration collided with an existing username.
    #[error("Username already exists: {0}")]
    UsernameTaken(String),

    /// Login password mismatch.
    #[error("Wrong password")]
    WrongPassword,

    /// No file record exists for the given transfer id.
    #[error("Unknown transfer: {0}")]
    TransferNotFound(String),

    /// No matching transfer is open on this connection.
    #[error("No active transfer on this connection")]
    TransferNotActive,

    /// The transfer's upload is still open, so it cannot be downloaded yet.
    #[error("Transfer still uploading: {0}")]
    TransferBusy(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - outbound queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Snapshot file is truncated or otherwise unreadable.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Result type alias using RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;
