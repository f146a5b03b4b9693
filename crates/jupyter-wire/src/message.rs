//! The in-memory message model.
//!
//! A [`Message`] is one logical unit of protocol traffic: routing identities
//! prepended by the transport, a structured header, the parent header that
//! correlates replies and broadcasts with the request that caused them, and
//! open metadata/content mappings.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::PROTOCOL_VERSION;

/// Structured message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Unique id for this message.
    pub msg_id: String,
    /// Type tag selecting a handler (e.g. `execute_request`).
    pub msg_type: String,
    /// Session id of the sender.
    pub session: String,
    pub username: String,
    /// Messaging protocol version, e.g. "5.4".
    pub version: String,
    /// ISO 8601 timestamp.
    pub date: String,
}

impl Header {
    /// Create a fresh header with a new message id and the current time.
    pub fn new(msg_type: &str, session: &str, username: &str) -> Self {
        Header {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: msg_type.to_owned(),
            session: session.to_owned(),
            username: username.to_owned(),
            version: PROTOCOL_VERSION.to_owned(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// One logical unit of protocol traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Opaque routing frames prepended by the transport. Echoed back
    /// unchanged on any reply sent on the same channel.
    pub identities: Vec<Bytes>,
    pub header: Header,
    /// Copy of the triggering request's header; `None` for unsolicited
    /// messages.
    pub parent_header: Option<Header>,
    /// Auxiliary key/value data, opaque to the core.
    pub metadata: Value,
    /// Type-specific payload; shape determined by `header.msg_type`.
    pub content: Value,
}

impl Message {
    /// Create a fresh, unsolicited message with empty metadata.
    pub fn new(msg_type: &str, session: &str, username: &str, content: Value) -> Self {
        Message {
            identities: Vec::new(),
            header: Header::new(msg_type, session, username),
            parent_header: None,
            metadata: Value::Object(Default::default()),
            content,
        }
    }

    /// Set the parent header from a triggering request.
    pub fn with_parent(mut self, parent: &Message) -> Self {
        self.parent_header = Some(parent.header.clone());
        self
    }

    /// Build a reply to this message: identities are echoed so the ROUTER
    /// socket routes it back to the requester, and the parent header is set
    /// to this message's header.
    pub fn reply(&self, msg_type: &str, session: &str, username: &str, content: Value) -> Message {
        Message {
            identities: self.identities.clone(),
            header: Header::new(msg_type, session, username),
            parent_header: Some(self.header.clone()),
            metadata: Value::Object(Default::default()),
            content,
        }
    }

    /// The message type tag.
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }
}

/// Map a request type to its reply type: `execute_request` -> `execute_reply`.
///
/// Types without a `_request` suffix are returned with `_reply` appended so
/// the unknown-type fallback can still name a well-formed reply.
pub fn reply_type_for(request_type: &str) -> String {
    match request_type.strip_suffix("_request") {
        Some(base) => format!("{}_reply", base),
        None => format!("{}_reply", request_type),
    }
}
