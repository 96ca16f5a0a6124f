//! Session management for the relay.
//!
//! A *session* is the live binding between a display name and one open
//! connection. This crate keeps that binding a bijection while users are
//! logged in, tracks every accepted connection (authenticated or not),
//! and announces membership changes.
//!
//! # How it fits in the stack
//!
//! ```text
//! Router (above)  ← registers on presence, looks up destinations
//!     ↕
//! Session Layer (this crate)  ← name ↔ connection, connection states
//!     ↕
//! Directory (beside)  ← login/logout pushed on every change
//! ```

mod error;
mod registry;

pub use error::SessionError;
pub use registry::{ConnectionState, SessionRegistry, Tracked};
