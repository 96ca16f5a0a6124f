//! User directory for the relay.
//!
//! The router treats persistence as an opaque collaborator reached through
//! the [`DirectoryStore`] trait: who has ever logged in, who is online
//! right now, the login history, per-user contact lists and message
//! counters. [`MemoryDirectory`] is the in-process implementation.
//!
//! User records are created on first login and never deleted. Logins are
//! appended to the history; logouts only clear the "active" entry.

mod error;
mod memory;
mod store;

pub use error::DirectoryError;
pub use memory::MemoryDirectory;
pub use store::{ActiveUser, DirectoryStore, LoginRecord, UserStats};
