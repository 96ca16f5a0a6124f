//! # Relay
//!
//! A text-chat relay: clients connect, present a unique display name,
//! and exchange point-to-point messages through the server. The server
//! also answers a few directory queries (known users, per-user contact
//! lists) backed by a pluggable [`DirectoryStore`].
//!
//! ## Architecture
//!
//! ```text
//!            accept loop ──Accepted──┐
//!                                    ▼
//! reader task (per conn) ──Frame──→ router task ──reply/forward──→ writer task (per conn)
//!                                    │
//!                    SessionRegistry + pending queue + DirectoryStore
//! ```
//!
//! The router is the single owner of all routing state. Each dispatch
//! cycle handles new connections, then frames in arrival order, then
//! delivers queued chats to destinations whose outbound queue has room.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relay::{MemoryDirectory, RelayServer};
//!
//! # async fn start() -> Result<(), relay::RelayError> {
//! let server = RelayServer::builder()
//!     .bind("0.0.0.0:7777")
//!     .build(Arc::new(MemoryDirectory::new()))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod connection;
mod error;
mod router;
mod server;

pub use config::ServerConfig;
pub use error::RelayError;
pub use server::{RelayServer, RelayServerBuilder};

pub use relay_directory::{DirectoryStore, MemoryDirectory};
