//! Error types for the session layer.

use relay_transport::ConnectionId;

/// Errors that can occur while binding names to connections.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Another live connection is already registered under this name.
    #[error("user with name {0:?} is already connected")]
    NameTaken(String),

    /// The connection is not tracked (never accepted, or already closed).
    #[error("connection {0} is not tracked")]
    UnknownConnection(ConnectionId),

    /// The connection already completed its handshake. A connection
    /// carries at most one name for its whole life.
    #[error("connection {0} is already registered as {1:?}")]
    AlreadyAuthenticated(ConnectionId, String),
}
