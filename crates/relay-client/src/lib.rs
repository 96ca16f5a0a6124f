//! Client side of the relay.
//!
//! [`ClientSession`] performs the presence handshake, keeps a cached copy
//! of the server's directory, sends chats, and surfaces inbound chats
//! as [`ClientEvent`]s over a channel. It never prints anything itself;
//! presentation is up to the caller (see the `relay-client` binary).

mod config;
mod error;
mod history;
mod session;

pub use config::ClientConfig;
pub use error::ClientError;
pub use history::{Direction, HistoryEntry};
pub use session::{ClientEvent, ClientSession};
