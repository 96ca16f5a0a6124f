//! Error types for the client session.

use relay_protocol::{DecodeError, SendError};
use relay_transport::TransportError;

/// Errors surfaced to whoever drives a [`ClientSession`](crate::ClientSession).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Every connection attempt failed.
    #[error("could not reach {addr} after {attempts} attempts: {source}")]
    Unreachable {
        addr: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The server answered a request with `400`.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The server answered with a code the request doesn't allow.
    #[error("unexpected response code {0}")]
    UnexpectedResponse(u16),

    /// No response arrived within the configured wait.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The recipient isn't a user the server knows about.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// The session is dead; no more traffic is possible.
    #[error("connection to server lost")]
    ConnectionLost,

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
