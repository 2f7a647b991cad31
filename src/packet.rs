//! Packet model - the RPC envelope carried inside text frames.
//!
//! Wire shape:
//!
//! ```json
//! { "api": "sum", "id": 7, "state": true, "fromClient": true, "body": [2, 3] }
//! ```
//!
//! `api` addresses the target operation by registered name or numeric alias.
//! `id` pairs a call with its reply; id 0 marks a notification (no reply).
//! `fromClient` tags the side that initiated the exchange and is preserved
//! on the reply, which is how a receiver tells replies from inbound calls.
//! `state=false` means `body` holds an error message instead of a value.
//!
//! The body stays an unparsed [`RawValue`] until the dispatch thunk or the
//! caller decodes it against the concrete parameter/result type.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};

use crate::codec::JsonCodec;
use crate::error::Result;
use crate::protocol::Role;

/// Correlation id reserved for notifications.
pub const NOTIFICATION_ID: i64 = 0;

/// Operation identifier: registered name or compact numeric alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiId {
    Code(u32),
    Name(String),
}

impl ApiId {
    /// Name form, for registry lookups and error messages.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            ApiId::Name(name) => Some(name),
            ApiId::Code(_) => None,
        }
    }
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiId::Name(name) => f.write_str(name),
            ApiId::Code(code) => write!(f, "#{code}"),
        }
    }
}

impl From<&str> for ApiId {
    fn from(name: &str) -> Self {
        ApiId::Name(name.to_string())
    }
}

impl From<u32> for ApiId {
    fn from(code: u32) -> Self {
        ApiId::Code(code)
    }
}

/// The RPC envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub api: ApiId,
    pub id: i64,
    pub state: bool,
    pub from_client: bool,
    pub body: Box<RawValue>,
}

impl Packet {
    /// Outbound call carrying serialized arguments.
    pub fn call<T: Serialize>(api: ApiId, id: i64, from_client: bool, args: &T) -> Result<Self> {
        Ok(Self {
            api,
            id,
            state: true,
            from_client,
            body: to_raw_value(args)?,
        })
    }

    /// Successful reply carrying a serialized return value.
    ///
    /// `id` and `from_client` must repeat the values of the call answered.
    pub fn reply<T: Serialize>(api: ApiId, id: i64, from_client: bool, value: &T) -> Result<Self> {
        Ok(Self {
            api,
            id,
            state: true,
            from_client,
            body: to_raw_value(value)?,
        })
    }

    /// Failure reply; the body is the error message string.
    pub fn failure(api: ApiId, id: i64, from_client: bool, message: &str) -> Result<Self> {
        Ok(Self {
            api,
            id,
            state: false,
            from_client,
            body: to_raw_value(&message)?,
        })
    }

    /// Whether this packet answers a call made by the `role` side.
    ///
    /// `from_client` marks exchanges initiated by the client; replies keep
    /// the call's flag. So an inbound packet whose flag equals "I am the
    /// client" can only be a reply routed back to this side.
    #[inline]
    pub fn is_reply_for(&self, role: Role) -> bool {
        self.from_client == (role == Role::Client)
    }

    /// Notifications expect no reply.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id == NOTIFICATION_ID
    }

    /// Decode the body against a concrete type.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.body.get())?)
    }

    /// Error message of a failure reply.
    ///
    /// Falls back to the raw body text when the body is not a JSON string,
    /// so a malformed failure still produces something readable.
    pub fn error_message(&self) -> String {
        self.decode_body::<String>()
            .unwrap_or_else(|_| self.body.get().to_string())
    }

    /// Serialize the envelope for the wire.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        JsonCodec::encode(self)
    }

    /// Parse an envelope from a message payload.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        JsonCodec::decode(bytes)
    }
}
