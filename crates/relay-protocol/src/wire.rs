//! Sending and receiving whole messages over a framed connection.
//!
//! Reads are blocking with a bounded wait: [`recv_message`] returns
//! `Ok(None)` when no complete frame arrived in time, so a caller can
//! go and poll something else. Any bytes of a partial frame stay
//! buffered in the connection for the next call.

use std::time::Duration;

use relay_transport::{Connection, TransportError};

use crate::{Message, ProtocolError};

/// Why a frame could not be turned into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The connection failed underneath us (reset, broken pipe, ...).
    #[error(transparent)]
    Transport(TransportError),

    /// The peer announced a frame larger than the cap. The stream can't
    /// be resynchronised after this.
    #[error("frame exceeds {max} bytes")]
    Oversized { max: usize },

    /// A complete frame arrived but its content is not a valid message.
    #[error("malformed frame: {0}")]
    Malformed(#[from] ProtocolError),
}

impl DecodeError {
    /// `true` if the connection is gone and should be torn down.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Closed | Self::Transport(_))
    }
}

/// Why a message could not be sent.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Encodes `message` and writes it as one frame.
pub async fn send_message<C>(conn: &C, message: &Message) -> Result<(), SendError>
where
    C: Connection<Error = TransportError>,
{
    let bytes = message.to_bytes()?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Waits up to `wait` for the next frame and decodes it.
///
/// - `Ok(Some(message))`: a complete, valid frame.
/// - `Ok(None)`: no complete frame yet. Not an error.
/// - `Err(_)`: see [`DecodeError`]; use
///   [`is_connection_lost`](DecodeError::is_connection_lost) to decide
///   between teardown and a `400` reply.
pub async fn recv_message<C>(
    conn: &C,
    wait: Duration,
) -> Result<Option<Message>, DecodeError>
where
    C: Connection<Error = TransportError>,
{
    let frame = match tokio::time::timeout(wait, conn.recv()).await {
        Err(_elapsed) => return Ok(None),
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return Err(DecodeError::Closed),
        Ok(Err(TransportError::FrameTooLarge { max })) => {
            return Err(DecodeError::Oversized { max });
        }
        Ok(Err(e)) => return Err(DecodeError::Transport(e)),
    };

    tracing::trace!(id = %conn.id(), len = frame.len(), "frame received");
    Message::from_bytes(&frame).map(Some).map_err(DecodeError::Malformed)
}
