//! Unified error type for the relay server.

use relay_directory::DirectoryError;
use relay_protocol::ProtocolError;
use relay_session::SessionError;
use relay_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates a `From` impl, so
/// the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (name taken, unknown connection).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The directory store refused or failed an operation.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The requesting connection is not the one registered under `name`.
    #[error("not authorized to act as {0:?}")]
    NotAuthorized(String),

    /// The router task is gone; nothing can be dispatched any more.
    #[error("router stopped")]
    RouterStopped,
}
