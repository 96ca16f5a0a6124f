//! Per-connection I/O tasks.
//!
//! Every accepted connection gets two Tokio tasks:
//!   1. a **reader** that decodes frames and forwards them to the router
//!   2. a **writer** that drains the connection's outbound queue
//!
//! Neither task touches routing state. The reader stops when the peer
//! goes away or when the router drops the connection's shutdown handle.
//! The writer stops when the router drops the outbound sender, after
//! flushing whatever was already queued.

use std::sync::Arc;
use std::time::Duration;

use relay_protocol::{DecodeError, Message, SendError, recv_message, send_message};
use relay_transport::{Connection, TcpConnection};
use tokio::sync::{mpsc, oneshot};

use crate::router::RouterEvent;

/// Reads frames until the connection is lost or the router lets go.
pub(crate) async fn read_loop(
    conn: Arc<TcpConnection>,
    events: mpsc::Sender<RouterEvent>,
    mut shutdown: oneshot::Receiver<()>,
    poll: Duration,
) {
    let id = conn.id();

    loop {
        let event = tokio::select! {
            // Resolves (with `Err`) as soon as the router drops the sender.
            _ = &mut shutdown => break,
            result = recv_message(conn.as_ref(), poll) => match result {
                Ok(None) => continue,
                Ok(Some(message)) => RouterEvent::Frame { id, message },
                Err(DecodeError::Oversized { max }) => RouterEvent::Oversized { id, max },
                Err(e) if e.is_connection_lost() => RouterEvent::Lost {
                    id,
                    reason: e.to_string(),
                },
                Err(e) => RouterEvent::Malformed {
                    id,
                    reason: e.to_string(),
                },
            },
        };

        let last = matches!(
            event,
            RouterEvent::Lost { .. } | RouterEvent::Oversized { .. }
        );
        if events.send(event).await.is_err() || last {
            break;
        }
    }

    tracing::debug!(%id, "reader stopped");
}

/// Writes queued messages in order, then closes the connection.
pub(crate) async fn write_loop(conn: Arc<TcpConnection>, mut outbound: mpsc::Receiver<Message>) {
    let id = conn.id();

    while let Some(message) = outbound.recv().await {
        match send_message(conn.as_ref(), &message).await {
            Ok(()) => tracing::debug!(%id, "frame written"),
            // One message we can't encode doesn't poison the connection.
            Err(SendError::Protocol(e)) => {
                tracing::warn!(%id, error = %e, "dropping unencodable message");
            }
            Err(SendError::Transport(e)) => {
                // Dropping the receiver marks the queue closed; the router
                // tears the connection down on its next reply or delivery.
                tracing::debug!(%id, error = %e, "write failed");
                return;
            }
        }
    }

    if let Err(e) = conn.close().await {
        tracing::debug!(%id, error = %e, "close failed");
    }
    tracing::debug!(%id, "writer stopped");
}
