//! The client side of a relay session.
//!
//! One connection, two activities:
//!   - the **sender** (whoever calls [`ClientSession::send_chat`] and the
//!     directory methods), which sends a frame and, for requests, waits
//!     for the matching response
//!   - the **receiver** ([`ClientSession::spawn_receiver`]), which polls
//!     for inbound chats
//!
//! Both go through one async mutex around the connection, so frames
//! never interleave and a response is never stolen by the other side.
//! Chats that show up while a request waits for its response are
//! delivered to the inbox all the same.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay_protocol::{
    ChatMessage, DecodeError, MAX_FRAME_LEN, Message, Request, Response, recv_message,
    send_message,
};
use relay_transport::{Connection, TcpConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::history::{Direction, History, HistoryEntry};
use crate::{ClientConfig, ClientError};

/// What the session reports to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A chat addressed to us.
    Message { from: String, text: String },
    /// The connection failed. Sent once; the session is dead afterwards.
    ConnectionLost,
}

/// A logged-in connection to a relay server.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: ClientConfig,
    conn: tokio::sync::Mutex<TcpConnection>,
    events: mpsc::UnboundedSender<ClientEvent>,
    alive: AtomicBool,
    closing: AtomicBool,
    users: Mutex<BTreeSet<String>>,
    contacts: Mutex<BTreeSet<String>>,
    history: Mutex<History>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClientSession {
    /// Connects to `addr`, presents as `name` and loads the directory
    /// caches.
    ///
    /// Returns the session and the receiving end of its event stream.
    ///
    /// # Errors
    /// - [`ClientError::Unreachable`] if no attempt could connect
    /// - [`ClientError::Rejected`] if the server refused the name
    pub async fn connect(
        addr: &str,
        name: &str,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let conn = connect_with_retry(addr, &config).await?;
        tracing::info!(addr, peer = %conn.peer_addr(), "connected");

        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                config,
                conn: tokio::sync::Mutex::new(conn),
                events,
                alive: AtomicBool::new(true),
                closing: AtomicBool::new(false),
                users: Mutex::new(BTreeSet::new()),
                contacts: Mutex::new(BTreeSet::new()),
                history: Mutex::new(History::default()),
            }),
        };

        let response = session.exchange(Request::presence(name)).await?;
        expect_ok(response)?;
        tracing::info!(name, "presence accepted");

        session.refresh_users().await?;
        session.refresh_contacts().await?;
        Ok((session, events_rx))
    }

    /// The name this session is registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `false` once the connection has failed.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Directory
    // ---------------------------------------------------------------------

    /// Fetches every user the server knows and caches the list.
    pub async fn refresh_users(&self) -> Result<Vec<String>, ClientError> {
        let response = self.exchange(Request::users_request(self.name())).await?;
        let users = expect_list(response)?;
        *lock(&self.inner.users) = users.iter().cloned().collect();
        Ok(users)
    }

    /// Fetches our contact list and caches it.
    pub async fn refresh_contacts(&self) -> Result<Vec<String>, ClientError> {
        let response = self.exchange(Request::get_contacts(self.name())).await?;
        let contacts = expect_list(response)?;
        *lock(&self.inner.contacts) = contacts.iter().cloned().collect();
        Ok(contacts)
    }

    pub async fn add_contact(&self, contact: &str) -> Result<(), ClientError> {
        let response = self
            .exchange(Request::add_contact(self.name(), contact))
            .await?;
        expect_ok(response)?;
        lock(&self.inner.contacts).insert(contact.to_string());
        Ok(())
    }

    pub async fn remove_contact(&self, contact: &str) -> Result<(), ClientError> {
        let response = self
            .exchange(Request::remove_contact(self.name(), contact))
            .await?;
        expect_ok(response)?;
        lock(&self.inner.contacts).remove(contact);
        Ok(())
    }

    /// Cached user list, sorted.
    pub fn known_users(&self) -> Vec<String> {
        lock(&self.inner.users).iter().cloned().collect()
    }

    /// Cached contact list, sorted.
    pub fn contacts(&self) -> Vec<String> {
        lock(&self.inner.contacts).iter().cloned().collect()
    }

    // ---------------------------------------------------------------------
    // Chat
    // ---------------------------------------------------------------------

    /// Sends `text` to `to`.
    ///
    /// `to` must be a known user; the cache is refreshed once before
    /// giving up. The relay does not confirm delivery.
    pub async fn send_chat(&self, to: &str, text: &str) -> Result<(), ClientError> {
        if !self.is_alive() {
            return Err(ClientError::ConnectionLost);
        }
        if !lock(&self.inner.users).contains(to) {
            self.refresh_users().await?;
            if !lock(&self.inner.users).contains(to) {
                return Err(ClientError::UnknownUser(to.to_string()));
            }
        }

        lock(&self.inner.history).record(to, Direction::Outgoing, text);
        let message = Message::from(Request::chat(self.name(), to, text));
        let conn = self.inner.conn.lock().await;
        self.send(&conn, &message).await
    }

    /// Local history, oldest first, optionally only with `peer`.
    pub fn history(&self, peer: Option<&str>) -> Vec<HistoryEntry> {
        lock(&self.inner.history).entries(peer)
    }

    /// Starts the receiver activity.
    ///
    /// Polls the connection for at most `poll` at a time, releasing the
    /// lock in between so requests can go out. Stops on connection loss
    /// or [`shutdown`](Self::shutdown).
    pub fn spawn_receiver(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while session.is_alive() && !session.inner.closing.load(Ordering::Acquire) {
                let result = {
                    let conn = session.inner.conn.lock().await;
                    recv_message(&*conn, session.inner.config.poll).await
                };
                match result {
                    Ok(Some(message)) => session.dispatch(message),
                    Ok(None) => tokio::task::yield_now().await,
                    Err(e) if e.is_connection_lost() => {
                        tracing::warn!(error = %e, "receiver lost the connection");
                        session.mark_lost();
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring bad frame"),
                }
            }
            tracing::debug!("receiver stopped");
        })
    }

    /// Leaves the relay: sends `exit`, waits for it to flush, closes.
    pub async fn shutdown(&self) {
        self.inner.closing.store(true, Ordering::Release);
        let conn = self.inner.conn.lock().await;

        if self.is_alive() {
            let exit = Message::from(Request::exit(self.name()));
            if let Err(e) = send_message(&*conn, &exit).await {
                tracing::debug!(error = %e, "exit not sent");
            }
            tokio::time::sleep(self.inner.config.exit_grace).await;
        }
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "close failed");
        }
        self.inner.alive.store(false, Ordering::Release);
        tracing::info!(name = %self.inner.name, "session closed");
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Sends `request` and waits for the response, holding the socket
    /// the whole time.
    async fn exchange(&self, request: Request) -> Result<Response, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::ConnectionLost);
        }
        let kind = request.kind();
        let conn = self.inner.conn.lock().await;
        self.send(&conn, &request.into()).await?;

        let deadline = tokio::time::Instant::now() + self.inner.config.response_timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(kind, "no response in time");
                return Err(ClientError::Timeout);
            }
            let wait = self.inner.config.poll.min(deadline - now);

            match recv_message(&*conn, wait).await {
                Ok(Some(Message::Response(response))) => {
                    tracing::debug!(kind, code = response.code, "response received");
                    return Ok(response);
                }
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => {}
                Err(e) if e.is_connection_lost() => {
                    self.mark_lost();
                    return Err(e.into());
                }
                Err(DecodeError::Oversized { max }) => {
                    tracing::warn!(max, "oversized frame from server");
                    self.mark_lost();
                    return Err(ClientError::ConnectionLost);
                }
                Err(e) => tracing::warn!(error = %e, "ignoring bad frame"),
            }
        }
    }

    async fn send(&self, conn: &TcpConnection, message: &Message) -> Result<(), ClientError> {
        match send_message(conn, message).await {
            Ok(()) => Ok(()),
            Err(relay_protocol::SendError::Transport(e)) => {
                tracing::warn!(error = %e, "send failed");
                self.mark_lost();
                Err(ClientError::ConnectionLost)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Hands an unsolicited message to the inbox.
    fn dispatch(&self, message: Message) {
        match message {
            Message::Request(Request::Chat(ChatMessage { from, to, text, .. }))
                if to == self.inner.name =>
            {
                tracing::debug!(%from, "chat received");
                lock(&self.inner.history).record(&from, Direction::Incoming, &text);
                let _ = self.inner.events.send(ClientEvent::Message { from, text });
            }
            other => tracing::debug!(?other, "ignoring unsolicited message"),
        }
    }

    /// Flags the session dead and reports it, once.
    fn mark_lost(&self) {
        if self.inner.alive.swap(false, Ordering::AcqRel) {
            let _ = self.inner.events.send(ClientEvent::ConnectionLost);
        }
    }
}

async fn connect_with_retry(
    addr: &str,
    config: &ClientConfig,
) -> Result<TcpConnection, ClientError> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match TcpConnection::connect(addr, MAX_FRAME_LEN).await {
            Ok(conn) => return Ok(conn),
            Err(source) if attempt >= attempts => {
                return Err(ClientError::Unreachable {
                    addr: addr.to_string(),
                    attempts,
                    source,
                });
            }
            Err(e) => {
                tracing::warn!(addr, attempt, error = %e, "connect failed, retrying");
                tokio::time::sleep(config.retry_delay).await;
                attempt += 1;
            }
        }
    }
}

fn expect_ok(response: Response) -> Result<(), ClientError> {
    match response.code {
        Response::OK => Ok(()),
        Response::BAD_REQUEST => Err(rejected(response)),
        code => Err(ClientError::UnexpectedResponse(code)),
    }
}

fn expect_list(response: Response) -> Result<Vec<String>, ClientError> {
    match response.code {
        Response::ACCEPTED => Ok(response.list_info.unwrap_or_default()),
        Response::BAD_REQUEST => Err(rejected(response)),
        code => Err(ClientError::UnexpectedResponse(code)),
    }
}

fn rejected(response: Response) -> ClientError {
    ClientError::Rejected(response.error.unwrap_or_else(|| "Bad Request".to_string()))
}
