//! Binary snapshot of the user registry.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! u64 user_count
//! per user:
//!   str username, str password
//!   u64 friend_count,  str × friend_count
//!   u64 message_count, { str sender, str body, i64 time } × message_count
//!   u64 file_count,    { str sender, u64 size, str filename, str transfer_id, i64 time } × file_count
//! str = u64 byte length + UTF-8 bytes
//! ```
//!
//! Transfer records, sessions and open transfers are not persisted.

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::session::{FileNotice, Message, User};

/// Serialize users in iteration order.
pub fn encode<'a>(users: impl ExactSizeIterator<Item = &'a User>) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u64_le(users.len() as u64);

    for user in users {
        put_str(&mut buf, &user.username);
        put_str(&mut buf, &user.password);

        buf.put_u64_le(user.friends.len() as u64);
        for friend in &user.friends {
            put_str(&mut buf, friend);
        }

        buf.put_u64_le(user.messages.len() as u64);
        for message in &user.messages {
            put_str(&mut buf, &message.username);
            put_str(&mut buf, &message.message);
            buf.put_i64_le(message.time);
        }

        buf.put_u64_le(user.files.len() as u64);
        for file in &user.files {
            put_str(&mut buf, &file.username);
            buf.put_u64_le(file.size);
            put_str(&mut buf, &file.filename);
            put_str(&mut buf, &file.transfer_id);
            buf.put_i64_le(file.time);
        }
    }

    buf.freeze()
}

/// Parse a snapshot produced by [`encode`].
///
/// Truncated input, oversized counts and invalid UTF-8 are all errors;
/// trailing bytes are ignored.
pub fn decode(mut data: &[u8]) -> Result<Vec<User>> {
    let buf = &mut data;
    let count = get_count(buf)?;
    let mut users = Vec::with_capacity(count.min(1024));

    for _ in 0..count {
        let mut user = User::new(get_str(buf)?, get_str(buf)?);

        for _ in 0..get_count(buf)? {
            user.friends.push(get_str(buf)?);
        }

        for _ in 0..get_count(buf)? {
            user.messages.push_back(Message {
                username: get_str(buf)?,
                message: get_str(buf)?,
                time: get_i64(buf)?,
            });
        }

        for _ in 0..get_count(buf)? {
            user.files.push_back(FileNotice {
                username: get_str(buf)?,
                size: get_u64(buf)?,
                filename: get_str(buf)?,
                transfer_id: get_str(buf)?,
                time: get_i64(buf)?,
            });
        }

        users.push(user);
    }

    Ok(users)
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u64_le(s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn ensure(buf: &&[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(RelayError::Snapshot(format!(
            "Truncated {}: need {} bytes, {} left",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8, "integer")?;
    Ok(buf.get_u64_le())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    ensure(buf, 8, "integer")?;
    Ok(buf.get_i64_le())
}

/// A count or length; anything larger than the bytes left is corrupt.
fn get_count(buf: &mut &[u8]) -> Result<usize> {
    let n = get_u64(buf)?;
    usize::try_from(n)
        .ok()
        .filter(|&n| n <= buf.remaining())
        .ok_or_else(|| RelayError::Snapshot(format!("Implausible length {}", n)))
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    let len = get_count(buf)?;
    ensure(buf, len, "string")?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| RelayError::Snapshot("String is not valid UTF-8".to_string()))
}

/// Snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the registry. A missing file is an empty registry.
    pub async fn load(&self) -> Result<Vec<User>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let users = decode(&data)?;
        info!(path = %self.path.display(), users = users.len(), "Snapshot loaded");
        Ok(users)
    }

    /// Write the registry to a sibling temp file, then rename it into place.
    pub async fn save<'a>(&self, users: impl ExactSizeIterator<Item = &'a User>) -> Result<()> {
        let count = users.len();
        let data = encode(users);

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = fs::write(&tmp, &data).await {
            warn!(path = %tmp.display(), error = %e, "Snapshot write failed");
            return Err(e.into());
        }
        fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), users = count, bytes = data.len(), "Snapshot saved");
        Ok(())
    }
}
