//! Typed requests decoded from a frame header.
//!
//! Decoding happens in two steps so a reply can still be addressed when the
//! body of a request is unusable:
//!
//! 1. [`RequestHeader::parse`] recovers `uuid` and the raw `action` value.
//!    Failure here means nobody can be answered and the frame is dropped.
//! 2. [`RequestHeader::decode`] checks the action and its fields, yielding a
//!    [`Request`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::codec::JsonCodec;
use crate::error::{RelayError, Result};

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Register = 0,
    Login = 1,
    Quit = 2,
    Search = 3,
    AddFriend = 4,
    SendMessage = 5,
    SendFile = 6,
    SendFileDataStart = 7,
    SendFileData = 8,
    SendFileDataEnd = 9,
    ReceiveFileDataStart = 10,
    ReceiveFileData = 11,
    ReceiveFileDataEnd = 12,
}

impl Action {
    #[inline]
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Interpret a raw header value as an opcode.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|code| Self::try_from(code).ok())
    }
}

impl TryFrom<i64> for Action {
    type Error = RelayError;

    fn try_from(code: i64) -> Result<Self> {
        Ok(match code {
            0 => Self::Register,
            1 => Self::Login,
            2 => Self::Quit,
            3 => Self::Search,
            4 => Self::AddFriend,
            5 => Self::SendMessage,
            6 => Self::SendFile,
            7 => Self::SendFileDataStart,
            8 => Self::SendFileData,
            9 => Self::SendFileDataEnd,
            10 => Self::ReceiveFileDataStart,
            11 => Self::ReceiveFileData,
            12 => Self::ReceiveFileDataEnd,
            other => return Err(RelayError::Protocol(format!("Unknown action {}", other))),
        })
    }
}

/// A decoded request. Chunk bytes for uploads travel in the frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Quit,
    Search,
    AddFriend { users: Vec<String> },
    SendMessage { target: String, message: String, time: Option<i64> },
    SendFile { target: String, size: u64, filename: String },
    SendFileDataStart { transfer_id: String },
    SendFileData,
    SendFileDataEnd,
    ReceiveFileDataStart { transfer_id: String },
    ReceiveFileData,
    ReceiveFileDataEnd,
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Self::Register { .. } => Action::Register,
            Self::Login { .. } => Action::Login,
            Self::Quit => Action::Quit,
            Self::Search => Action::Search,
            Self::AddFriend { .. } => Action::AddFriend,
            Self::SendMessage { .. } => Action::SendMessage,
            Self::SendFile { .. } => Action::SendFile,
            Self::SendFileDataStart { .. } => Action::SendFileDataStart,
            Self::SendFileData => Action::SendFileData,
            Self::SendFileDataEnd => Action::SendFileDataEnd,
            Self::ReceiveFileDataStart { .. } => Action::ReceiveFileDataStart,
            Self::ReceiveFileData => Action::ReceiveFileData,
            Self::ReceiveFileDataEnd => Action::ReceiveFileDataEnd,
        }
    }
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct Users {
    users: Vec<String>,
}

#[derive(Deserialize)]
struct OutgoingMessage {
    username: String,
    message: String,
    #[serde(default)]
    time: Option<i64>,
}

#[derive(Deserialize)]
struct SendMessageFields {
    message: OutgoingMessage,
}

#[derive(Deserialize)]
struct OutgoingFile {
    username: String,
    size: u64,
    filename: String,
}

#[derive(Deserialize)]
struct SendFileFields {
    file: OutgoingFile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferFields {
    transfer_id: String,
}

/// Envelope of one request: correlation id, raw action, remaining fields.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    uuid: String,
    action: Value,
    fields: Map<String, Value>,
}

impl RequestHeader {
    /// Parse the header and recover its correlation id.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut fields = JsonCodec::decode_object(bytes)?;

        let uuid = match fields.remove("uuid") {
            Some(Value::String(uuid)) => uuid,
            Some(_) => return Err(RelayError::Protocol("uuid must be a string".to_string())),
            None => return Err(RelayError::Protocol("Missing uuid".to_string())),
        };
        let action = fields.remove("action").unwrap_or(Value::Null);

        Ok(Self {
            uuid,
            action,
            fields,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The `action` value as sent, for echoing in replies.
    pub fn raw_action(&self) -> &Value {
        &self.action
    }

    /// Validate the action and its fields.
    pub fn decode(&self) -> Result<Request> {
        let action = match &self.action {
            Value::Null => return Err(RelayError::Protocol("Missing action".to_string())),
            value => value
                .as_i64()
                .ok_or_else(|| RelayError::Protocol(format!("Invalid action {}", value)))
                .and_then(Action::try_from)?,
        };

        Ok(match action {
            Action::Register => {
                let Credentials { username, password } = self.fields()?;
                Request::Register { username, password }
            }
            Action::Login => {
                let Credentials { username, password } = self.fields()?;
                Request::Login { username, password }
            }
            Action::Quit => Request::Quit,
            Action::Search => Request::Search,
            Action::AddFriend => {
                let Users { users } = self.fields()?;
                Request::AddFriend { users }
            }
            Action::SendMessage => {
                let SendMessageFields { message } = self.fields()?;
                Request::SendMessage {
                    target: message.username,
                    message: message.message,
                    time: message.time,
                }
            }
            Action::SendFile => {
                let SendFileFields { file } = self.fields()?;
                Request::SendFile {
                    target: file.username,
                    size: file.size,
                    filename: file.filename,
                }
            }
            Action::SendFileDataStart => {
                let TransferFields { transfer_id } = self.fields()?;
                Request::SendFileDataStart { transfer_id }
            }
            Action::SendFileData => Request::SendFileData,
            Action::SendFileDataEnd => Request::SendFileDataEnd,
            Action::ReceiveFileDataStart => {
                let TransferFields { transfer_id } = self.fields()?;
                Request::ReceiveFileDataStart { transfer_id }
            }
            Action::ReceiveFileData => Request::ReceiveFileData,
            Action::ReceiveFileDataEnd => Request::ReceiveFileDataEnd,
        })
    }

    fn fields<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| RelayError::Protocol(format!("Invalid request fields: {}", e)))
    }
}
