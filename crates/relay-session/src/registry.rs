//! The session registry: tracks connections and the names bound to them.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself; it uses plain
//! `HashMap`s. It is owned by the router task and mutated only there, so
//! every operation is atomic with respect to the dispatch cycle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use relay_directory::DirectoryStore;
use relay_transport::ConnectionId;
use tokio::sync::watch;

use crate::SessionError;

/// Where a tracked connection is in its lifecycle.
///
/// ```text
///   Connected ──(register)──→ Authenticated
///       │                          │
///       └──(untrack)──→ Closed ←──(unregister / untrack)
/// ```
///
/// `Closed` is not stored: a closed connection is simply no longer
/// tracked, which is what makes the transitions one-way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no presence handshake yet.
    Connected,
    /// Registered under `name`.
    Authenticated { name: String },
}

/// A connection the registry knows about.
#[derive(Debug)]
pub struct Tracked<H> {
    /// Whatever the owner needs to reach the connection.
    pub handle: H,
    pub peer: SocketAddr,
    pub state: ConnectionState,
}

impl<H> Tracked<H> {
    /// The registered name, if the connection is authenticated.
    pub fn name(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Authenticated { name } => Some(name),
            ConnectionState::Connected => None,
        }
    }
}

/// Maps display names to live connections.
///
/// Generic over the connection handle `H` so the registry doesn't care
/// whether the owner reaches a connection through a socket, a channel or
/// a test stub.
///
/// ## Invariants
///
/// - Every registered name maps to exactly one tracked connection in
///   state `Authenticated` with that name, and vice versa.
/// - Every successful register/unregister is pushed to the directory
///   (login/logout) and bumps the membership generation.
pub struct SessionRegistry<H> {
    connections: HashMap<ConnectionId, Tracked<H>>,
    names: HashMap<String, ConnectionId>,
    directory: Arc<dyn DirectoryStore>,
    membership: watch::Sender<u64>,
}

impl<H> SessionRegistry<H> {
    /// Creates an empty registry that reports logins to `directory`.
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        let (membership, _) = watch::channel(0);
        Self {
            connections: HashMap::new(),
            names: HashMap::new(),
            directory,
            membership,
        }
    }

    /// Starts tracking a freshly accepted connection in state `Connected`.
    pub fn track(&mut self, id: ConnectionId, peer: SocketAddr, handle: H) {
        self.connections.insert(
            id,
            Tracked {
                handle,
                peer,
                state: ConnectionState::Connected,
            },
        );
        tracing::debug!(%id, %peer, "connection tracked");
    }

    /// Binds `name` to connection `id`.
    ///
    /// # Errors
    /// - [`SessionError::UnknownConnection`] if `id` isn't tracked
    /// - [`SessionError::AlreadyAuthenticated`] if `id` already has a name
    /// - [`SessionError::NameTaken`] if another connection holds `name`
    pub fn register(&mut self, name: &str, id: ConnectionId) -> Result<(), SessionError> {
        let tracked = self
            .connections
            .get_mut(&id)
            .ok_or(SessionError::UnknownConnection(id))?;
        if let ConnectionState::Authenticated { name: existing } = &tracked.state {
            return Err(SessionError::AlreadyAuthenticated(id, existing.clone()));
        }
        if self.names.contains_key(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        tracked.state = ConnectionState::Authenticated {
            name: name.to_string(),
        };
        let peer = tracked.peer;
        self.names.insert(name.to_string(), id);

        if let Err(e) = self.directory.record_login(name, peer.ip(), peer.port()) {
            tracing::warn!(name, error = %e, "failed to record login");
        }
        self.membership.send_modify(|generation| *generation += 1);
        tracing::info!(name, %id, %peer, "session registered");
        Ok(())
    }

    /// Removes the session registered as `name` and stops tracking its
    /// connection, returning it so the caller can close it.
    ///
    /// Idempotent: returns `None` if `name` isn't registered.
    pub fn unregister(&mut self, name: &str) -> Option<Tracked<H>> {
        let id = self.names.remove(name)?;
        let tracked = self.connections.remove(&id);
        self.after_logout(name, id);
        tracked
    }

    /// Stops tracking connection `id`, unregistering its name if it had
    /// one. Returns the entry so the caller can close it.
    pub fn untrack(&mut self, id: ConnectionId) -> Option<Tracked<H>> {
        let tracked = self.connections.remove(&id)?;
        if let Some(name) = tracked.name() {
            self.names.remove(name);
            self.after_logout(name, id);
        }
        Some(tracked)
    }

    fn after_logout(&self, name: &str, id: ConnectionId) {
        if let Err(e) = self.directory.record_logout(name) {
            tracing::warn!(name, error = %e, "failed to record logout");
        }
        self.membership.send_modify(|generation| *generation += 1);
        tracing::info!(name, %id, "session unregistered");
    }

    /// The handle of the connection registered as `name`.
    pub fn lookup(&self, name: &str) -> Option<&H> {
        let id = self.names.get(name)?;
        self.connections.get(id).map(|tracked| &tracked.handle)
    }

    /// The connection id registered as `name`.
    pub fn lookup_id(&self, name: &str) -> Option<ConnectionId> {
        self.names.get(name).copied()
    }

    /// `true` if `name` is registered to exactly connection `id`.
    pub fn is_registered_to(&self, name: &str, id: ConnectionId) -> bool {
        self.names.get(name) == Some(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Tracked<H>> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Tracked<H>> {
        self.connections.get_mut(&id)
    }

    /// Lifecycle state of connection `id`. `None` means closed (or never
    /// tracked).
    pub fn state_of(&self, id: ConnectionId) -> Option<&ConnectionState> {
        self.connections.get(&id).map(|tracked| &tracked.state)
    }

    /// The name bound to connection `id`, if any.
    pub fn name_of(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id).and_then(Tracked::name)
    }

    /// Every tracked connection, authenticated or not, in no particular order.
    pub fn all_connections(&self) -> impl Iterator<Item = (ConnectionId, &Tracked<H>)> {
        self.connections.iter().map(|(id, tracked)| (*id, tracked))
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort();
        names
    }

    /// Subscribes to membership changes. The value is a generation
    /// counter bumped on every register and unregister.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.membership.subscribe()
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.names.len()
    }
}

// =========================================================================
// Tests
// =========================================================================
