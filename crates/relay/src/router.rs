//! The router: single owner of sessions and pending deliveries.
//!
//! The router runs as one Tokio task. Reader tasks and the accept loop
//! feed it [`RouterEvent`]s; it answers through each connection's
//! bounded outbound queue. Because only this task mutates the
//! [`SessionRegistry`] and the pending queue, no locks are needed.
//!
//! ## Dispatch cycle
//!
//! ```text
//! wait for events (or cycle tick)
//!   → accept phase:   track new connections
//!   → dispatch phase: handle frames in arrival order
//!   → delivery phase: forward pending chats to writable destinations
//!   → reap phase:     drop idle connections
//! ```

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use relay_directory::DirectoryStore;
use relay_protocol::{ChatMessage, Message, Request, Response};
use relay_session::{SessionError, SessionRegistry};
use relay_transport::ConnectionId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::{RelayError, ServerConfig};

/// Reply text for frames that can't be understood.
const BAD_REQUEST: &str = "Bad Request";

/// Something that happened on a connection.
#[derive(Debug)]
pub(crate) enum RouterEvent {
    /// A new connection. Always sent before any other event for `id`.
    Accepted {
        id: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
        shutdown: oneshot::Sender<()>,
    },
    /// A well-formed message.
    Frame { id: ConnectionId, message: Message },
    /// A complete frame whose content is not a valid message.
    Malformed { id: ConnectionId, reason: String },
    /// The peer announced a frame over the size cap.
    Oversized { id: ConnectionId, max: usize },
    /// The connection is gone.
    Lost { id: ConnectionId, reason: String },
}

/// The router's handle on one connection.
///
/// Dropping it drops both senders: the writer flushes and closes, the
/// reader stops.
#[derive(Debug)]
pub(crate) struct Peer {
    outbound: mpsc::Sender<Message>,
    _shutdown: oneshot::Sender<()>,
    last_seen: Instant,
}

pub(crate) struct Router {
    registry: SessionRegistry<Peer>,
    directory: Arc<dyn DirectoryStore>,
    pending: VecDeque<ChatMessage>,
    events: mpsc::Receiver<RouterEvent>,
    config: ServerConfig,
}

impl Router {
    pub(crate) fn new(
        registry: SessionRegistry<Peer>,
        directory: Arc<dyn DirectoryStore>,
        events: mpsc::Receiver<RouterEvent>,
        config: ServerConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            pending: VecDeque::new(),
            events,
            config,
        }
    }

    /// Runs dispatch cycles until every event sender is gone.
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut batch = Vec::with_capacity(self.config.max_batch);

        loop {
            tokio::select! {
                received = self.events.recv_many(&mut batch, self.config.max_batch) => {
                    if received == 0 {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }
            self.cycle(batch.drain(..));
        }

        tracing::info!("router stopped");
    }

    /// One dispatch cycle over a batch of events.
    pub(crate) fn cycle(&mut self, batch: impl IntoIterator<Item = RouterEvent>) {
        // --- Accept phase ---
        let mut frames = Vec::new();
        for event in batch {
            match event {
                RouterEvent::Accepted {
                    id,
                    peer,
                    outbound,
                    shutdown,
                } => {
                    let handle = Peer {
                        outbound,
                        _shutdown: shutdown,
                        last_seen: Instant::now(),
                    };
                    self.registry.track(id, peer, handle);
                }
                other => frames.push(other),
            }
        }

        // --- Dispatch phase ---
        for event in frames {
            self.handle(event);
        }

        // --- Delivery phase ---
        self.deliver();

        // --- Reap phase ---
        self.reap_idle();
    }

    fn handle(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Accepted { .. } => {}
            RouterEvent::Frame { id, message } => {
                if !self.touch(id) {
                    return;
                }
                match message {
                    Message::Request(request) => self.dispatch(id, request),
                    Message::Response(_) => {
                        tracing::warn!(%id, "client sent a response frame");
                        self.reply(id, Response::bad_request(BAD_REQUEST));
                    }
                }
            }
            RouterEvent::Malformed { id, reason } => {
                if !self.touch(id) {
                    return;
                }
                tracing::warn!(%id, %reason, "malformed frame");
                self.reply(id, Response::bad_request(BAD_REQUEST));
            }
            RouterEvent::Oversized { id, max } => {
                tracing::warn!(%id, max, "oversized frame");
                self.reply(id, Response::bad_request(format!("frame exceeds {max} bytes")));
                self.teardown(id, "oversized frame");
            }
            RouterEvent::Lost { id, reason } => self.teardown(id, &reason),
        }
    }

    /// Refreshes the idle clock. `false` if `id` is no longer tracked.
    fn touch(&mut self, id: ConnectionId) -> bool {
        match self.registry.get_mut(id) {
            Some(tracked) => {
                tracked.handle.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    fn dispatch(&mut self, id: ConnectionId, request: Request) {
        tracing::debug!(%id, kind = request.kind(), "dispatching request");

        match request {
            Request::Presence { user, .. } => self.presence(id, &user.account_name),
            Request::Chat(message) => match self.authorize(&message.from, id) {
                Ok(()) => self.accept_chat(id, message),
                Err(e) => self.reject(id, &e),
            },
            Request::Exit { account_name, .. } => match self.authorize(&account_name, id) {
                Ok(()) => {
                    self.registry.unregister(&account_name);
                    tracing::info!(%id, name = %account_name, "user exited");
                }
                Err(e) => self.reject(id, &e),
            },
            Request::GetContacts { user, .. } => {
                let result = self
                    .authorize(&user, id)
                    .and_then(|()| self.directory.list_contacts(&user).map_err(RelayError::from));
                self.answer(id, result.map(Response::accepted));
            }
            Request::AddContact {
                user, account_name, ..
            } => {
                let result = self
                    .authorize(&user, id)
                    .and_then(|()| {
                        self.directory
                            .add_contact(&user, &account_name)
                            .map_err(RelayError::from)
                    });
                self.answer(id, result.map(|()| Response::ok()));
            }
            Request::RemoveContact {
                user, account_name, ..
            } => {
                let result = self
                    .authorize(&user, id)
                    .and_then(|()| {
                        self.directory
                            .remove_contact(&user, &account_name)
                            .map_err(RelayError::from)
                    });
                self.answer(id, result.map(|()| Response::ok()));
            }
            Request::UsersRequest { account_name, .. } => {
                let result = self
                    .authorize(&account_name, id)
                    .and_then(|()| self.directory.list_users().map_err(RelayError::from));
                self.answer(id, result.map(Response::accepted));
            }
        }
    }

    fn presence(&mut self, id: ConnectionId, name: &str) {
        match self.registry.register(name, id) {
            Ok(()) => self.reply(id, Response::ok()),
            Err(SessionError::NameTaken(name)) => {
                tracing::warn!(%id, %name, "duplicate name rejected");
                self.reply(
                    id,
                    Response::bad_request(format!("user with name {name:?} is already connected")),
                );
                self.teardown(id, "duplicate name");
            }
            Err(e) => self.reject(id, &RelayError::from(e)),
        }
    }

    /// Checks that `name` is registered to exactly connection `id`.
    fn authorize(&self, name: &str, id: ConnectionId) -> Result<(), RelayError> {
        if self.registry.is_registered_to(name, id) {
            Ok(())
        } else {
            Err(RelayError::NotAuthorized(name.to_string()))
        }
    }

    fn accept_chat(&mut self, id: ConnectionId, message: ChatMessage) {
        // Forwarding re-encodes the chat, which can grow it: an integer
        // `time` comes back out as a float.
        if let Err(e) = Message::from(Request::Chat(message.clone())).to_bytes() {
            self.reject(id, &RelayError::from(e));
            return;
        }

        if let Err(e) = self.directory.record_message(&message.from, &message.to) {
            tracing::warn!(from = %message.from, error = %e, "failed to record message");
        }
        tracing::debug!(from = %message.from, to = %message.to, "chat queued");
        self.pending.push_back(message);
    }

    fn answer(&mut self, id: ConnectionId, result: Result<Response, RelayError>) {
        match result {
            Ok(response) => self.reply(id, response),
            Err(e) => self.reject(id, &e),
        }
    }

    fn reject(&mut self, id: ConnectionId, error: &RelayError) {
        let name = self.registry.name_of(id).unwrap_or("-");
        tracing::warn!(%id, name, %error, "request rejected");
        self.reply(id, Response::bad_request(error.to_string()));
    }

    /// Queues `response` on `id`'s outbound queue.
    fn reply(&mut self, id: ConnectionId, response: Response) {
        let Some(tracked) = self.registry.get(id) else {
            return;
        };
        match tracked.handle.outbound.try_send(response.into()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%id, "outbound queue full, reply dropped");
            }
            Err(TrySendError::Closed(_)) => self.teardown(id, "writer gone"),
        }
    }

    fn deliver(&mut self) {
        let mut requeue = VecDeque::new();
        // Destinations found not writable this cycle; later messages to
        // them wait behind the first one.
        let mut blocked: HashSet<String> = HashSet::new();

        while let Some(message) = self.pending.pop_front() {
            if blocked.contains(&message.to) {
                requeue.push_back(message);
                continue;
            }
            let Some(id) = self.registry.lookup_id(&message.to) else {
                tracing::warn!(
                    from = %message.from,
                    to = %message.to,
                    "routing failure: destination not connected, message dropped"
                );
                continue;
            };
            let Some(outbound) = self.registry.lookup(&message.to).map(|p| p.outbound.clone())
            else {
                continue;
            };

            match outbound.try_reserve() {
                Ok(permit) => {
                    tracing::info!(
                        from = %message.from,
                        to = %message.to,
                        "message queued for delivery"
                    );
                    permit.send(Request::Chat(message).into());
                }
                Err(TrySendError::Full(())) => {
                    tracing::debug!(to = %message.to, "destination busy, requeued");
                    blocked.insert(message.to.clone());
                    requeue.push_back(message);
                }
                Err(TrySendError::Closed(())) => {
                    tracing::warn!(
                        from = %message.from,
                        to = %message.to,
                        "destination connection gone, message dropped"
                    );
                    self.teardown(id, "writer gone");
                }
            }
        }

        self.pending = requeue;
    }

    fn reap_idle(&mut self) {
        let Some(limit) = self.config.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let idle: Vec<ConnectionId> = self
            .registry
            .all_connections()
            .filter(|(_, tracked)| now.duration_since(tracked.handle.last_seen) > limit)
            .map(|(id, _)| id)
            .collect();
        for id in idle {
            self.teardown(id, "idle timeout");
        }
    }

    /// Forgets `id`, unregistering its name. Dropping the [`Peer`] lets
    /// the writer flush and close. Idempotent.
    fn teardown(&mut self, id: ConnectionId, reason: &str) {
        if let Some(tracked) = self.registry.untrack(id) {
            tracing::info!(
                %id,
                peer = %tracked.peer,
                name = tracked.name().unwrap_or("-"),
                reason,
                sessions = self.registry.session_count(),
                "connection closed"
            );
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
