//! Registry records: users, messages, and file transfers.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A text message as delivered to its recipient.
///
/// `username` is the sender once the message is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub username: String,
    pub message: String,
    /// Creation time, epoch seconds.
    pub time: i64,
}

/// A completed file as announced to its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNotice {
    /// Sender.
    pub username: String,
    pub size: u64,
    pub filename: String,
    /// Sent as `uuid`; clients pass it back as `transferId`.
    #[serde(rename = "uuid")]
    pub transfer_id: String,
    pub time: i64,
}

/// A registered account.
///
/// Friends and both backlogs grow without bound; nothing is ever evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub username: String,
    /// Compared by plain equality.
    pub password: String,
    /// Append-only and not deduplicated.
    pub friends: Vec<String>,
    /// Messages received while offline, oldest first.
    pub messages: VecDeque<Message>,
    /// Files received while offline, oldest first.
    pub files: VecDeque<FileNotice>,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Server-side state of one announced transfer. Never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub sender: String,
    pub recipient: String,
    /// Declared total size in bytes.
    pub size: u64,
    pub filename: String,
    /// Server-issued transfer id.
    pub id: String,
    pub time: i64,
    /// Bytes stored so far while an upload is open; `None` when the record
    /// is not open for streaming.
    pub progress: Option<u64>,
}

impl FileRecord {
    /// The recipient-facing view of this record.
    pub fn notice(&self) -> FileNotice {
        FileNotice {
            username: self.sender.clone(),
            size: self.size,
            filename: self.filename.clone(),
            transfer_id: self.id.clone(),
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Transfer currently open on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBinding {
    pub transfer_id: String,
    pub direction: TransferDirection,
    /// Next read offset for downloads.
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_notice_wire_names() {
        let notice = FileNotice {
            username: "ann".into(),
            size: 10,
            filename: "a.txt".into(),
            transfer_id: "t-1".into(),
            time: 5,
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["uuid"], "t-1");
        assert!(json.get("transferId").is_none());
        assert_eq!(json["username"], "ann");
    }

    #[test]
    fn test_notice_uses_sender() {
        let record = FileRecord {
            sender: "ann".into(),
            recipient: "bob".into(),
            size: 3,
            filename: "x".into(),
            id: "id".into(),
            time: 1,
            progress: None,
        };
        assert_eq!(record.notice().username, "ann");
    }
}
