//! Message types for the relay's wire format.
//!
//! Every frame carries one JSON object. Client requests are discriminated
//! by an `action` key; server replies carry a `response` code instead.
//!
//! ```text
//! {"action":"presence","time":1700000000.5,"user":{"account_name":"alice"}}
//! {"action":"message","from":"alice","to":"bob","time":1700000001.0,"message_text":"hi"}
//! {"response":202,"list_info":["alice","bob"]}
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Codec, JsonCodec, ProtocolError};

/// Largest payload a single frame may carry, in bytes.
pub const MAX_FRAME_LEN: usize = 1024;

/// Seconds since the Unix epoch, as carried in the `time` fields.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// The `user` object inside a presence handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub account_name: String,
}

/// A point-to-point chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub to: String,
    pub time: f64,
    #[serde(rename = "message_text")]
    pub text: String,
}

impl ChatMessage {
    /// Creates a chat message stamped with the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            time: unix_time(),
            text: text.into(),
        }
    }
}

/// Everything a client can ask of the server.
///
/// `#[serde(tag = "action")]` makes the variant name a field of the
/// object itself, so a `Request::Exit` is `{"action":"exit", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Login handshake; must be the first request on a connection.
    Presence { time: f64, user: User },

    /// Chat message to another user.
    #[serde(rename = "message")]
    Chat(ChatMessage),

    /// Graceful disconnect notice.
    Exit { time: f64, account_name: String },

    /// Contact list of `user`.
    GetContacts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
        user: String,
    },

    /// Add `account_name` to `user`'s contacts.
    #[serde(rename = "add")]
    AddContact {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
        user: String,
        account_name: String,
    },

    /// Remove `account_name` from `user`'s contacts.
    #[serde(rename = "remove")]
    RemoveContact {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
        user: String,
        account_name: String,
    },

    /// Every user the server has ever seen.
    #[serde(rename = "get_users")]
    UsersRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
        account_name: String,
    },
}

impl Request {
    pub fn presence(account_name: impl Into<String>) -> Self {
        Self::Presence {
            time: unix_time(),
            user: User {
                account_name: account_name.into(),
            },
        }
    }

    pub fn chat(
        from: impl Into<String>,
        to: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::Chat(ChatMessage::new(from, to, text))
    }

    pub fn exit(account_name: impl Into<String>) -> Self {
        Self::Exit {
            time: unix_time(),
            account_name: account_name.into(),
        }
    }

    pub fn get_contacts(user: impl Into<String>) -> Self {
        Self::GetContacts {
            time: Some(unix_time()),
            user: user.into(),
        }
    }

    pub fn add_contact(user: impl Into<String>, contact: impl Into<String>) -> Self {
        Self::AddContact {
            time: Some(unix_time()),
            user: user.into(),
            account_name: contact.into(),
        }
    }

    pub fn remove_contact(
        user: impl Into<String>,
        contact: impl Into<String>,
    ) -> Self {
        Self::RemoveContact {
            time: Some(unix_time()),
            user: user.into(),
            account_name: contact.into(),
        }
    }

    pub fn users_request(account_name: impl Into<String>) -> Self {
        Self::UsersRequest {
            time: Some(unix_time()),
            account_name: account_name.into(),
        }
    }

    /// Short name of the request kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Presence { .. } => "presence",
            Self::Chat(_) => "message",
            Self::Exit { .. } => "exit",
            Self::GetContacts { .. } => "get_contacts",
            Self::AddContact { .. } => "add",
            Self::RemoveContact { .. } => "remove",
            Self::UsersRequest { .. } => "get_users",
        }
    }

    /// Checks the rules serde can't: names must not be empty.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let names: Vec<(&str, &str)> = match self {
            Self::Presence { user, .. } => {
                vec![("account_name", user.account_name.as_str())]
            }
            Self::Chat(chat) => {
                vec![("from", chat.from.as_str()), ("to", chat.to.as_str())]
            }
            Self::Exit { account_name, .. }
            | Self::UsersRequest { account_name, .. } => {
                vec![("account_name", account_name.as_str())]
            }
            Self::GetContacts { user, .. } => vec![("user", user.as_str())],
            Self::AddContact {
                user, account_name, ..
            }
            | Self::RemoveContact {
                user, account_name, ..
            } => vec![("user", user.as_str()), ("account_name", account_name.as_str())],
        };
        match names.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(ProtocolError::InvalidMessage(format!(
                "`{field}` must not be empty"
            ))),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Server acknowledgement or result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "response")]
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_info: Option<Vec<String>>,
}

impl Response {
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const BAD_REQUEST: u16 = 400;

    /// `200`: success, nothing to return.
    pub fn ok() -> Self {
        Self {
            code: Self::OK,
            error: None,
            list_info: None,
        }
    }

    /// `202`: success with a list payload.
    pub fn accepted(list_info: Vec<String>) -> Self {
        Self {
            code: Self::ACCEPTED,
            error: None,
            list_info: Some(list_info),
        }
    }

    /// `400`: client error with a human-readable reason.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            code: Self::BAD_REQUEST,
            error: Some(reason.into()),
            list_info: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, Self::OK | Self::ACCEPTED)
    }
}

// ---------------------------------------------------------------------------
// Message: one frame's worth of content
// ---------------------------------------------------------------------------

/// The content of one frame, in either direction.
///
/// Serialization is untagged: the inner request or response is written
/// as-is. Deserialization goes through [`Message::classify`], which looks
/// at the discriminant key first and fails closed when there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Classifies a parsed JSON value into a request or a response.
    pub fn classify(value: Value) -> Result<Self, ProtocolError> {
        let Some(object) = value.as_object() else {
            return Err(ProtocolError::InvalidMessage(
                "frame is not a JSON object".into(),
            ));
        };
        let is_request = object.contains_key("action");
        let is_response = object.contains_key("response");

        if is_request {
            serde_json::from_value(value)
                .map(Self::Request)
                .map_err(ProtocolError::Decode)
        } else if is_response {
            serde_json::from_value(value)
                .map(Self::Response)
                .map_err(ProtocolError::Decode)
        } else {
            Err(ProtocolError::InvalidMessage(
                "missing `action` or `response` key".into(),
            ))
        }
    }

    /// Encodes the message as one frame payload, enforcing [`MAX_FRAME_LEN`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = JsonCodec.encode(self)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::Oversized {
                len: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(bytes)
    }

    /// Decodes, classifies and validates one frame payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = JsonCodec.decode(data)?;
        let message = Self::classify(value)?;
        if let Self::Request(request) = &message {
            request.validate()?;
        }
        Ok(message)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::classify(value).map_err(serde::de::Error::custom)
    }
}
