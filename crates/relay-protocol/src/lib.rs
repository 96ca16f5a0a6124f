//! Wire protocol for the relay.
//!
//! This crate defines what clients and the server say to each other:
//!
//! - **Types** ([`Message`], [`Request`], [`Response`], [`ChatMessage`]):
//!   the JSON objects that travel inside frames.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those objects are
//!   converted to and from bytes.
//! - **Wire** ([`send_message`], [`recv_message`]): one message per
//!   frame over a [`relay_transport::Connection`], with a bounded wait on
//!   reads.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Session / Router
//! ```

mod codec;
mod error;
mod types;
mod wire;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ChatMessage, MAX_FRAME_LEN, Message, Request, Response, User, unix_time,
};
pub use wire::{DecodeError, SendError, recv_message, send_message};
