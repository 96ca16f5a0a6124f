//! `RelayServer` builder and accept loop.
//!
//! This is the entry point for running a relay. It ties together all the
//! layers: transport → protocol → session → router.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_directory::DirectoryStore;
use relay_session::SessionRegistry;
use relay_transport::{Connection, TcpConnection, TcpTransport, Transport};
use tokio::sync::{mpsc, oneshot, watch};

use crate::connection::{read_loop, write_loop};
use crate::router::{Router, RouterEvent};
use crate::{RelayError, ServerConfig};

/// How many events readers may queue ahead of the router before they
/// wait.
const EVENT_QUEUE: usize = 1024;

/// Builder for configuring and starting a relay server.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use relay::{MemoryDirectory, RelayServerBuilder};
/// # async fn start() -> Result<(), relay::RelayError> {
/// let server = RelayServerBuilder::new()
///     .bind("0.0.0.0:7777")
///     .build(Arc::new(MemoryDirectory::new()))
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RelayServerBuilder {
    bind_addr: String,
    config: ServerConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener and wires the router to `directory`.
    ///
    /// Nothing is accepted until [`RelayServer::run`] is called.
    pub async fn build(
        self,
        directory: Arc<dyn DirectoryStore>,
    ) -> Result<RelayServer, RelayError> {
        let transport = TcpTransport::bind(&self.bind_addr, self.config.max_frame_len).await?;

        let registry = SessionRegistry::new(Arc::clone(&directory));
        let membership = registry.subscribe();
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE);
        let router = Router::new(registry, Arc::clone(&directory), events_rx, self.config.clone());

        Ok(RelayServer {
            transport,
            directory,
            membership,
            router,
            events,
            config: self.config,
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RelayServer {
    transport: TcpTransport,
    directory: Arc<dyn DirectoryStore>,
    membership: watch::Receiver<u64>,
    router: Router,
    events: mpsc::Sender<RouterEvent>,
    config: ServerConfig,
}

impl RelayServer {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The directory store the server reports to.
    pub fn directory(&self) -> Arc<dyn DirectoryStore> {
        Arc::clone(&self.directory)
    }

    /// Membership notifications: the value changes every time a user
    /// logs in or out.
    pub fn membership(&self) -> watch::Receiver<u64> {
        self.membership.clone()
    }

    /// Starts the router and runs the accept loop.
    ///
    /// Each accepted connection gets a reader and a writer task. Accept
    /// failures are logged and the loop keeps going; it only returns if
    /// the router task is gone.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let router = tokio::spawn(self.router.run());
        tracing::info!(addr = ?self.transport.local_addr().ok(), "relay server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    if let Err(e) = spawn_connection(conn, &self.events, &self.config).await {
                        router.abort();
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Announces `conn` to the router, then starts its I/O tasks.
///
/// The `Accepted` event goes out before the reader exists, so the router
/// always learns about a connection before any of its frames.
async fn spawn_connection(
    conn: TcpConnection,
    events: &mpsc::Sender<RouterEvent>,
    config: &ServerConfig,
) -> Result<(), RelayError> {
    let conn = Arc::new(conn);
    let id = conn.id();
    let peer = conn.peer_addr();

    let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity);
    let (shutdown, shutdown_rx) = oneshot::channel();
    events
        .send(RouterEvent::Accepted {
            id,
            peer,
            outbound,
            shutdown,
        })
        .await
        .map_err(|_| RelayError::RouterStopped)?;

    tracing::debug!(%id, %peer, "connection accepted");
    tokio::spawn(read_loop(
        Arc::clone(&conn),
        events.clone(),
        shutdown_rx,
        config.read_poll,
    ));
    tokio::spawn(write_loop(conn, outbound_rx));
    Ok(())
}
