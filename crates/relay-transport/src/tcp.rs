//! TCP transport with length-delimited framing via `tokio-util`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{
    FramedRead, FramedWrite, LengthDelimitedCodec, LengthDelimitedCodecError,
};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
    max_frame_len: usize,
}

impl TcpTransport {
    /// Binds a new transport to the given address. Every accepted
    /// connection rejects frames larger than `max_frame_len`.
    pub async fn bind(
        addr: &str,
        max_frame_len: usize,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, max_frame_len, "TCP transport listening");
        Ok(Self {
            listener,
            max_frame_len,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = TcpConnection::from_stream(stream, addr, self.max_frame_len);
        tracing::debug!(id = %conn.id, %addr, "accepted TCP connection");
        Ok(conn)
    }
}

/// A single framed TCP connection.
///
/// The read and write halves sit behind separate locks, so one task can
/// wait for input while another writes.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    max_frame_len: usize,
    reader: Mutex<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
}

impl TcpConnection {
    /// Connects to a remote listener.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        max_frame_len: usize,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        let peer = stream.peer_addr().map_err(TransportError::ConnectFailed)?;
        Ok(Self::from_stream(stream, peer, max_frame_len))
    }

    fn from_stream(
        stream: TcpStream,
        peer: SocketAddr,
        max_frame_len: usize,
    ) -> Self {
        // Small interactive frames; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "failed to disable Nagle");
        }
        let (rx, tx) = stream.into_split();
        let id =
            ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            peer,
            max_frame_len,
            reader: Mutex::new(FramedRead::new(rx, codec(max_frame_len))),
            writer: Mutex::new(FramedWrite::new(tx, codec(max_frame_len))),
        }
    }

    /// Returns the frame size cap for this connection.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

fn codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_len)
        .new_codec()
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if data.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                max: self.max_frame_len,
            });
        }
        self.writer
            .lock()
            .await
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        match self.reader.lock().await.next().await {
            Some(Ok(frame)) => Ok(Some(frame.to_vec())),
            None => Ok(None),
            Some(Err(e)) => {
                let oversized = e
                    .get_ref()
                    .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());
                if oversized {
                    Err(TransportError::FrameTooLarge {
                        max: self.max_frame_len,
                    })
                } else {
                    Err(TransportError::ReceiveFailed(e))
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // FramedWrite is a Sink for more than one item type; name ours.
        SinkExt::<Bytes>::close(&mut *self.writer.lock().await)
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
