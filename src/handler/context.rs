//! Per-request context and reply building.
//!
//! Every reply header carries `action`, `uuid` and `status`. Handlers build
//! a [`Reply`] from the [`RequestContext`] of the request they answer:
//!
//! ```ignore
//! let reply = ctx.success().field("transferId", id);
//! let reply = ctx.error(&RelayError::NotLoggedIn);
//! ```

use bytes::Bytes;
use serde_json::{Map, Value};

use super::request::Action;
use crate::codec::JsonCodec;
use crate::error::{RelayError, Result};
use crate::transport::ConnectionId;
use crate::writer::OutboundFrame;

/// Reply status codes.
///
/// Codes 2 and 3 are scoped to the action: for Register, 2 is
/// [`USERNAME_EXISTS`]; for Login, 2 is [`USERNAME_NOT_EXIST`] and 3 is
/// [`PASSWORD_WRONG`].
pub mod status {
    pub const SUCCESS: i64 = 0;
    pub const MALFORMED: i64 = 1;
    pub const USERNAME_EXISTS: i64 = 2;
    pub const USERNAME_NOT_EXIST: i64 = 2;
    pub const PASSWORD_WRONG: i64 = 3;
    pub const NOT_LOGGED_IN: i64 = 4;
    pub const USER_NOT_FOUND: i64 = 5;
    pub const TRANSFER_NOT_FOUND: i64 = 6;
    pub const TRANSFER_NOT_ACTIVE: i64 = 7;
    pub const STORAGE_ERROR: i64 = 8;
}

/// Correlation id used for unsolicited server pushes.
pub const PUSH_UUID: &str = "message";

/// Wire status for `err` raised while handling `action`.
pub fn status_for(action: Option<Action>, err: &RelayError) -> i64 {
    match err {
        RelayError::UsernameTaken(_) => status::USERNAME_EXISTS,
        RelayError::UnknownUser(_) if action == Some(Action::Login) => status::USERNAME_NOT_EXIST,
        RelayError::UnknownUser(_) => status::USER_NOT_FOUND,
        RelayError::WrongPassword => status::PASSWORD_WRONG,
        RelayError::NotLoggedIn => status::NOT_LOGGED_IN,
        RelayError::TransferNotFound(_) => status::TRANSFER_NOT_FOUND,
        RelayError::TransferNotActive | RelayError::TransferBusy(_) => status::TRANSFER_NOT_ACTIVE,
        RelayError::Io(_) | RelayError::Snapshot(_) => status::STORAGE_ERROR,
        _ => status::MALFORMED,
    }
}

/// A reply or push header plus optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    header: Map<String, Value>,
    body: Bytes,
}

impl Reply {
    pub fn new(action: Value, uuid: &str, status: i64) -> Self {
        let mut header = Map::new();
        header.insert("action".to_string(), action);
        header.insert("uuid".to_string(), Value::from(uuid));
        header.insert("status".to_string(), Value::from(status));
        Self {
            header,
            body: Bytes::new(),
        }
    }

    /// An unsolicited push caused by `action`.
    pub fn push(action: Action) -> Self {
        Self::new(Value::from(action.code()), PUSH_UUID, status::SUCCESS)
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.header.insert(key.to_string(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn into_frame(self) -> Result<OutboundFrame> {
        let header = JsonCodec::encode(&self.header)?;
        OutboundFrame::new(Bytes::from(header), self.body)
    }
}

/// What a handler knows about the request it is answering.
#[derive(Debug, Clone)]
pub struct RequestContext {
    conn: ConnectionId,
    uuid: String,
    raw_action: Value,
    action: Option<Action>,
}

impl RequestContext {
    pub fn new(conn: ConnectionId, uuid: impl Into<String>, raw_action: Value) -> Self {
        let action = Action::from_value(&raw_action);
        Self {
            conn,
            uuid: uuid.into(),
            raw_action,
            action,
        }
    }

    #[inline]
    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    #[inline]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The action, if the request named a known one.
    #[inline]
    pub fn action(&self) -> Option<Action> {
        self.action
    }

    pub fn success(&self) -> Reply {
        Reply::new(self.raw_action.clone(), &self.uuid, status::SUCCESS)
    }

    /// Error reply with the status `err` maps to and its message.
    pub fn error(&self, err: &RelayError) -> Reply {
        Reply::new(
            self.raw_action.clone(),
            &self.uuid,
            status_for(self.action, err),
        )
        .field("error", err.to_string())
    }
}
