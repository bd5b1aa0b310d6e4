//! Session directory: the shared tables every handler reads and mutates.
//!
//! - username → [`User`]
//! - connection → bound username (and the reverse index for presence)
//! - transfer id → [`FileRecord`]
//! - connection → [`TransferBinding`]
//!
//! The directory references connections only by [`ConnectionId`]; the
//! listener owns the sockets. It is not synchronized itself: the engine
//! wraps it in one exclusive lock held for the handling of a whole frame.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};
use uuid::Uuid;

use super::model::{FileNotice, FileRecord, Message, TransferBinding, TransferDirection, User};
use crate::error::{RelayError, Result};
use crate::transport::ConnectionId;

/// Where a routed item went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// Recipient is online; the caller pushes `item` to `conn`.
    Push {
        conn: ConnectionId,
        recipient: String,
        item: T,
    },
    /// Recipient is offline; the item was appended to their backlog.
    Queued,
}

/// What a successful login hands back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginBacklog {
    pub friends: Vec<String>,
    pub messages: Vec<Message>,
    pub files: Vec<FileNotice>,
}

/// Current read position of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCursor {
    pub transfer_id: String,
    pub offset: u64,
    pub size: u64,
}

/// Identity and transfer state dropped when a connection goes away.
#[derive(Debug, Default)]
pub struct Departed {
    pub username: Option<String>,
    pub transfer: Option<TransferBinding>,
}

#[derive(Debug, Default)]
pub struct Directory {
    /// Ordered so that searches list usernames alphabetically.
    users: BTreeMap<String, User>,
    sessions: HashMap<ConnectionId, String>,
    online: HashMap<String, ConnectionId>,
    files: HashMap<String, FileRecord>,
    transfers: HashMap<ConnectionId, TransferBinding>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a loaded user registry.
    ///
    /// File records for queued file notices are rebuilt so their recipients
    /// can still download them.
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        let mut directory = Self::new();
        for user in users {
            for notice in &user.files {
                directory.files.insert(
                    notice.transfer_id.clone(),
                    FileRecord {
                        sender: notice.username.clone(),
                        recipient: user.username.clone(),
                        size: notice.size,
                        filename: notice.filename.clone(),
                        id: notice.transfer_id.clone(),
                        time: notice.time,
                        progress: None,
                    },
                );
            }
            directory.users.insert(user.username.clone(), user);
        }
        directory
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// All users in username order.
    pub fn users(&self) -> impl ExactSizeIterator<Item = &User> {
        self.users.values()
    }

    pub fn user(&self, username: &str) -> Result<&User> {
        self.users
            .get(username)
            .ok_or_else(|| RelayError::UnknownUser(username.to_string()))
    }

    fn user_mut(&mut self, username: &str) -> Result<&mut User> {
        self.users
            .get_mut(username)
            .ok_or_else(|| RelayError::UnknownUser(username.to_string()))
    }

    /// Every registered username, ascending.
    pub fn usernames(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    /// Username bound to `conn`.
    pub fn identity(&self, conn: ConnectionId) -> Result<&str> {
        self.sessions
            .get(&conn)
            .map(String::as_str)
            .ok_or(RelayError::NotLoggedIn)
    }

    /// Connection `username` is logged in on, if any.
    pub fn connection_of(&self, username: &str) -> Option<ConnectionId> {
        self.online.get(username).copied()
    }

    pub fn file(&self, transfer_id: &str) -> Result<&FileRecord> {
        self.files
            .get(transfer_id)
            .ok_or_else(|| RelayError::TransferNotFound(transfer_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Bind `conn` to `username`, dropping whatever either side was bound to
    /// before.
    fn bind(&mut self, conn: ConnectionId, username: &str) {
        self.unbind(conn);

        if let Some(previous) = self.online.remove(username) {
            self.sessions.remove(&previous);
            warn!(user = %username, old = %previous, new = %conn, "Login displaced an older connection");
        }

        self.sessions.insert(conn, username.to_string());
        self.online.insert(username.to_string(), conn);
    }

    /// Drop the identity bound to `conn`, returning it.
    pub fn unbind(&mut self, conn: ConnectionId) -> Option<String> {
        let username = self.sessions.remove(&conn)?;
        if self.online.get(&username) == Some(&conn) {
            self.online.remove(&username);
        }
        Some(username)
    }

    /// Create an account and log `conn` into it.
    pub fn register(&mut self, conn: ConnectionId, username: &str, password: &str) -> Result<()> {
        if self.users.contains_key(username) {
            return Err(RelayError::UsernameTaken(username.to_string()));
        }

        self.users
            .insert(username.to_string(), User::new(username, password));
        self.bind(conn, username);
        debug!(user = %username, conn = %conn, "Registered");
        Ok(())
    }

    /// Log `conn` in and return the user's friends and full backlog.
    ///
    /// The backlog is left in place, so every login re-delivers it.
    pub fn login(
        &mut self,
        conn: ConnectionId,
        username: &str,
        password: &str,
    ) -> Result<LoginBacklog> {
        let user = self.user(username)?;
        if user.password != password {
            return Err(RelayError::WrongPassword);
        }

        let backlog = LoginBacklog {
            friends: user.friends.clone(),
            messages: user.messages.iter().cloned().collect(),
            files: user.files.iter().cloned().collect(),
        };

        self.bind(conn, username);
        Ok(backlog)
    }

    /// Log `conn` out.
    pub fn quit(&mut self, conn: ConnectionId) -> Result<String> {
        self.unbind(conn).ok_or(RelayError::NotLoggedIn)
    }

    /// Forget everything tied to `conn`.
    ///
    /// An upload left open is closed, keeping whatever bytes arrived.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Departed {
        let username = self.unbind(conn);
        let transfer = self.release_transfer(conn);
        Departed { username, transfer }
    }

    /// Drop the transfer bound to `conn`. An upload is closed with whatever
    /// bytes it received, so the file becomes downloadable again.
    fn release_transfer(&mut self, conn: ConnectionId) -> Option<TransferBinding> {
        let binding = self.transfers.remove(&conn)?;
        if binding.direction == TransferDirection::Upload {
            if let Some(record) = self.files.get_mut(&binding.transfer_id) {
                record.progress = None;
            }
            debug!(conn = %conn, transfer = %binding.transfer_id, "Upload closed without an end marker");
        }
        Some(binding)
    }

    // ------------------------------------------------------------------
    // Friends and messages
    // ------------------------------------------------------------------

    /// Make the logged-in user and every target friends of each other.
    ///
    /// All targets are validated before anything is appended. Returns the
    /// subject's username and the online targets to notify.
    pub fn add_friends(
        &mut self,
        conn: ConnectionId,
        targets: &[String],
    ) -> Result<(String, Vec<(String, ConnectionId)>)> {
        let subject = self.identity(conn)?.to_string();
        if targets.is_empty() {
            return Err(RelayError::Protocol("AddFriend needs at least one user".to_string()));
        }
        for target in targets {
            self.user(target)?;
        }

        let mut notify = Vec::new();
        for target in targets {
            self.user_mut(&subject)?.friends.push(target.clone());
            self.user_mut(target)?.friends.push(subject.clone());
            if let Some(target_conn) = self.connection_of(target) {
                notify.push((target.clone(), target_conn));
            }
        }

        Ok((subject, notify))
    }

    /// Route a message from the user logged in on `conn` to `target`.
    pub fn send_message(
        &mut self,
        conn: ConnectionId,
        target: &str,
        body: String,
        time: i64,
    ) -> Result<Delivery<Message>> {
        let sender = self.identity(conn)?.to_string();
        self.user(target)?;

        let message = Message {
            username: sender,
            message: body,
            time,
        };

        match self.connection_of(target) {
            Some(target_conn) => Ok(Delivery::Push {
                conn: target_conn,
                recipient: target.to_string(),
                item: message,
            }),
            None => {
                self.enqueue_message(target, message)?;
                Ok(Delivery::Queued)
            }
        }
    }

    pub fn enqueue_message(&mut self, recipient: &str, message: Message) -> Result<()> {
        self.user_mut(recipient)?.messages.push_back(message);
        Ok(())
    }

    pub fn enqueue_file(&mut self, recipient: &str, notice: FileNotice) -> Result<()> {
        self.user_mut(recipient)?.files.push_back(notice);
        Ok(())
    }

    // ------------------------------------------------------------------
    // File transfers
    // ------------------------------------------------------------------

    /// Record a new transfer from the logged-in user to `target`.
    pub fn announce_file(
        &mut self,
        conn: ConnectionId,
        target: &str,
        size: u64,
        filename: String,
        time: i64,
    ) -> Result<String> {
        let sender = self.identity(conn)?.to_string();
        self.user(target)?;

        let id = Uuid::new_v4().to_string();
        self.files.insert(
            id.clone(),
            FileRecord {
                sender,
                recipient: target.to_string(),
                size,
                filename,
                id: id.clone(),
                time,
                progress: None,
            },
        );
        Ok(id)
    }

    /// Open `transfer_id` for upload on `conn`.
    ///
    /// Any transfer the connection already had open is released first.
    pub fn begin_upload(&mut self, conn: ConnectionId, transfer_id: &str) -> Result<()> {
        self.file(transfer_id)?;
        self.release_transfer(conn);

        if let Some(record) = self.files.get_mut(transfer_id) {
            record.progress = Some(0);
        }

        self.transfers.insert(
            conn,
            TransferBinding {
                transfer_id: transfer_id.to_string(),
                direction: TransferDirection::Upload,
                offset: 0,
            },
        );
        Ok(())
    }

    /// Transfer id of the upload open on `conn`.
    pub fn active_upload(&self, conn: ConnectionId) -> Result<&str> {
        match self.transfers.get(&conn) {
            Some(binding) if binding.direction == TransferDirection::Upload => {
                Ok(&binding.transfer_id)
            }
            _ => Err(RelayError::TransferNotActive),
        }
    }

    /// Account for `n` more uploaded bytes; returns the new total.
    pub fn record_upload(&mut self, conn: ConnectionId, n: u64) -> Result<u64> {
        let id = self.active_upload(conn)?.to_string();
        let record = self
            .files
            .get_mut(&id)
            .ok_or(RelayError::TransferNotFound(id))?;
        let progress = record.progress.unwrap_or(0) + n;
        record.progress = Some(progress);
        Ok(progress)
    }

    /// Close the upload on `conn` and route the finished file.
    pub fn finish_upload(&mut self, conn: ConnectionId) -> Result<Delivery<FileNotice>> {
        let id = self.active_upload(conn)?.to_string();
        self.transfers.remove(&conn);

        let record = self
            .files
            .get_mut(&id)
            .ok_or_else(|| RelayError::TransferNotFound(id.clone()))?;
        record.progress = None;
        let recipient = record.recipient.clone();
        let notice = record.notice();

        match self.connection_of(&recipient) {
            Some(target_conn) => Ok(Delivery::Push {
                conn: target_conn,
                recipient,
                item: notice,
            }),
            None => {
                self.enqueue_file(&recipient, notice)?;
                Ok(Delivery::Queued)
            }
        }
    }

    /// Open `transfer_id` for download on `conn`, starting at offset 0.
    ///
    /// Any transfer the connection already had open is released first.
    pub fn begin_download(&mut self, conn: ConnectionId, transfer_id: &str) -> Result<()> {
        self.file(transfer_id)?;
        self.release_transfer(conn);

        if self.file(transfer_id)?.progress.is_some() {
            return Err(RelayError::TransferBusy(transfer_id.to_string()));
        }

        self.transfers.insert(
            conn,
            TransferBinding {
                transfer_id: transfer_id.to_string(),
                direction: TransferDirection::Download,
                offset: 0,
            },
        );
        Ok(())
    }

    /// Where the download open on `conn` stands.
    pub fn download_cursor(&self, conn: ConnectionId) -> Result<DownloadCursor> {
        let binding = match self.transfers.get(&conn) {
            Some(binding) if binding.direction == TransferDirection::Download => binding,
            _ => return Err(RelayError::TransferNotActive),
        };
        let record = self.file(&binding.transfer_id)?;

        Ok(DownloadCursor {
            transfer_id: binding.transfer_id.clone(),
            offset: binding.offset,
            size: record.size,
        })
    }

    /// Move the download on `conn` forward by `n` bytes.
    pub fn advance_download(&mut self, conn: ConnectionId, n: u64) -> Result<()> {
        match self.transfers.get_mut(&conn) {
            Some(binding) if binding.direction == TransferDirection::Download => {
                binding.offset += n;
                Ok(())
            }
            _ => Err(RelayError::TransferNotActive),
        }
    }

    /// Close the download on `conn`.
    pub fn finish_download(&mut self, conn: ConnectionId) -> Result<String> {
        self.download_cursor(conn)?;
        let binding = self
            .transfers
            .remove(&conn)
            .ok_or(RelayError::TransferNotActive)?;
        Ok(binding.transfer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::from_raw(n)
    }

    fn directory_with(names: &[&str]) -> Directory {
        let mut directory = Directory::new();
        for (i, name) in names.iter().enumerate() {
            directory.register(conn(100 + i as u64), name, "pw").unwrap();
            directory.unbind(conn(100 + i as u64));
        }
        directory
    }

    #[test]
    fn test_register_binds_connection() {
        let mut directory = Directory::new();
        directory.register(conn(1), "ann", "secret").unwrap();

        assert_eq!(directory.identity(conn(1)).unwrap(), "ann");
        assert_eq!(directory.connection_of("ann"), Some(conn(1)));
    }

    #[test]
    fn test_double_registration_keeps_first_account() {
        let mut directory = Directory::new();
        directory.register(conn(1), "ann", "first").unwrap();

        let err = directory.register(conn(2), "ann", "second").unwrap_err();
        assert!(matches!(err, RelayError::UsernameTaken(name) if name == "ann"));

        let user = directory.user("ann").unwrap();
        assert_eq!(user.password, "first");
        assert!(user.friends.is_empty());
        assert!(directory.identity(conn(2)).is_err());
    }

    #[test]
    fn test_register_rebinds_connection() {
        let mut directory = Directory::new();
        directory.register(conn(1), "ann", "pw").unwrap();
        directory.register(conn(1), "bob", "pw").unwrap();

        assert_eq!(directory.identity(conn(1)).unwrap(), "bob");
        assert_eq!(directory.connection_of("ann"), None);
    }

    #[test]
    fn test_login_errors() {
        let mut directory = directory_with(&["ann"]);

        assert!(matches!(
            directory.login(conn(1), "nobody", "pw"),
            Err(RelayError::UnknownUser(_))
        ));
        assert!(matches!(
            directory.login(conn(1), "ann", "wrong"),
            Err(RelayError::WrongPassword)
        ));
        assert!(directory.identity(conn(1)).is_err());
    }

    #[test]
    fn test_login_displaces_older_connection() {
        let mut directory = directory_with(&["ann"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        directory.login(conn(2), "ann", "pw").unwrap();

        assert_eq!(directory.connection_of("ann"), Some(conn(2)));
        assert!(matches!(
            directory.identity(conn(1)),
            Err(RelayError::NotLoggedIn)
        ));
    }

    #[test]
    fn test_backlog_redelivered_on_every_login() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();

        directory
            .send_message(conn(1), "bob", "one".into(), 10)
            .unwrap();
        directory
            .send_message(conn(1), "bob", "two".into(), 11)
            .unwrap();
        let id = directory
            .announce_file(conn(1), "bob", 0, "f.bin".into(), 12)
            .unwrap();
        directory.begin_upload(conn(9), &id).unwrap();
        assert_eq!(directory.finish_upload(conn(9)).unwrap(), Delivery::Queued);

        let first = directory.login(conn(2), "bob", "pw").unwrap();
        assert_eq!(
            first
                .messages
                .iter()
                .map(|m| m.message.as_str())
                .collect::<Vec<_>>(),
            ["one", "two"]
        );
        assert_eq!(first.messages[0].username, "ann");
        assert_eq!(first.files.len(), 1);
        assert_eq!(first.files[0].transfer_id, id);

        directory.quit(conn(2)).unwrap();
        let second = directory.login(conn(2), "bob", "pw").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_message_presence_routing() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();

        assert_eq!(
            directory.send_message(conn(1), "bob", "hi".into(), 1).unwrap(),
            Delivery::Queued
        );
        assert_eq!(directory.user("bob").unwrap().messages.len(), 1);

        directory.login(conn(2), "bob", "pw").unwrap();
        match directory.send_message(conn(1), "bob", "again".into(), 2).unwrap() {
            Delivery::Push { conn: to, recipient, item } => {
                assert_eq!(to, conn(2));
                assert_eq!(recipient, "bob");
                assert_eq!(item.username, "ann");
                assert_eq!(item.message, "again");
            }
            Delivery::Queued => panic!("online recipient should get a push"),
        }
        assert_eq!(directory.user("bob").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_send_requires_login_and_known_peer() {
        let mut directory = directory_with(&["ann"]);
        assert!(matches!(
            directory.send_message(conn(1), "ann", "x".into(), 0),
            Err(RelayError::NotLoggedIn)
        ));

        directory.login(conn(1), "ann", "pw").unwrap();
        assert!(matches!(
            directory.send_message(conn(1), "ghost", "x".into(), 0),
            Err(RelayError::UnknownUser(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_add_friends_is_not_deduplicated() {
        let mut directory = directory_with(&["ann", "bob", "cat"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        directory.login(conn(3), "cat", "pw").unwrap();

        let (subject, notify) = directory
            .add_friends(conn(1), &["bob".into(), "cat".into()])
            .unwrap();
        assert_eq!(subject, "ann");
        assert_eq!(notify, vec![("cat".to_string(), conn(3))]);

        directory.add_friends(conn(1), &["bob".into()]).unwrap();
        assert_eq!(directory.user("ann").unwrap().friends, ["bob", "cat", "bob"]);
        assert_eq!(directory.user("bob").unwrap().friends, ["ann", "ann"]);
    }

    #[test]
    fn test_add_friends_validates_before_mutating() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();

        let result = directory.add_friends(conn(1), &["bob".into(), "ghost".into()]);
        assert!(matches!(result, Err(RelayError::UnknownUser(_))));
        assert!(directory.user("ann").unwrap().friends.is_empty());
        assert!(directory.user("bob").unwrap().friends.is_empty());
    }

    #[test]
    fn test_upload_lifecycle() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        directory.login(conn(2), "bob", "pw").unwrap();
        let id = directory
            .announce_file(conn(1), "bob", 6, "a.txt".into(), 0)
            .unwrap();
        assert_eq!(directory.file(&id).unwrap().progress, None);

        assert!(matches!(
            directory.record_upload(conn(5), 3),
            Err(RelayError::TransferNotActive)
        ));

        directory.begin_upload(conn(5), &id).unwrap();
        assert_eq!(directory.record_upload(conn(5), 4).unwrap(), 4);
        assert_eq!(directory.record_upload(conn(5), 2).unwrap(), 6);
        assert!(matches!(
            directory.begin_download(conn(6), &id),
            Err(RelayError::TransferBusy(_))
        ));

        match directory.finish_upload(conn(5)).unwrap() {
            Delivery::Push { conn: to, item, .. } => {
                assert_eq!(to, conn(2));
                assert_eq!(item.transfer_id, id);
                assert_eq!(item.username, "ann");
            }
            Delivery::Queued => panic!("bob is online"),
        }
        assert_eq!(directory.file(&id).unwrap().progress, None);
        assert!(!directory.transfers.contains_key(&conn(5)));
    }

    #[test]
    fn test_add_friends_rejects_empty_list() {
        let mut directory = directory_with(&["ann"]);
        directory.login(conn(1), "ann", "pw").unwrap();

        assert!(matches!(
            directory.add_friends(conn(1), &[]),
            Err(RelayError::Protocol(_))
        ));
        assert!(directory.user("ann").unwrap().friends.is_empty());
    }

    #[test]
    fn test_rebinding_connection_closes_open_upload() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        let first = directory
            .announce_file(conn(1), "bob", 4, "a".into(), 0)
            .unwrap();
        let second = directory
            .announce_file(conn(1), "bob", 4, "b".into(), 0)
            .unwrap();

        directory.begin_upload(conn(9), &first).unwrap();
        directory.record_upload(conn(9), 2).unwrap();
        directory.begin_upload(conn(9), &second).unwrap();
        assert_eq!(directory.file(&first).unwrap().progress, None);
        assert_eq!(directory.active_upload(conn(9)).unwrap(), second);

        directory.finish_upload(conn(9)).unwrap();
        directory.begin_download(conn(5), &first).unwrap();
        directory.begin_download(conn(5), &second).unwrap();
        assert_eq!(directory.download_cursor(conn(5)).unwrap().transfer_id, second);
    }

    #[test]
    fn test_download_on_uploading_connection_closes_upload() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        let id = directory
            .announce_file(conn(1), "bob", 4, "a".into(), 0)
            .unwrap();

        directory.begin_upload(conn(9), &id).unwrap();
        directory.begin_download(conn(9), &id).unwrap();

        assert_eq!(directory.file(&id).unwrap().progress, None);
        assert!(matches!(
            directory.active_upload(conn(9)),
            Err(RelayError::TransferNotActive)
        ));
        assert_eq!(directory.download_cursor(conn(9)).unwrap().offset, 0);
    }

    #[test]
    fn test_unknown_transfer() {
        let mut directory = Directory::new();
        assert!(matches!(
            directory.begin_upload(conn(1), "nope"),
            Err(RelayError::TransferNotFound(_))
        ));
        assert!(matches!(
            directory.begin_download(conn(1), "nope"),
            Err(RelayError::TransferNotFound(_))
        ));
    }

    #[test]
    fn test_download_cursor_per_connection() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        let id = directory
            .announce_file(conn(1), "bob", 100, "big".into(), 0)
            .unwrap();

        directory.begin_download(conn(7), &id).unwrap();
        directory.begin_download(conn(8), &id).unwrap();
        directory.advance_download(conn(7), 40).unwrap();

        assert_eq!(directory.download_cursor(conn(7)).unwrap().offset, 40);
        assert_eq!(directory.download_cursor(conn(8)).unwrap().offset, 0);
        assert_eq!(directory.download_cursor(conn(8)).unwrap().size, 100);

        assert_eq!(directory.finish_download(conn(7)).unwrap(), id);
        assert!(matches!(
            directory.download_cursor(conn(7)),
            Err(RelayError::TransferNotActive)
        ));
    }

    #[test]
    fn test_disconnect_clears_bindings() {
        let mut directory = directory_with(&["ann", "bob"]);
        directory.login(conn(1), "ann", "pw").unwrap();
        let id = directory
            .announce_file(conn(1), "bob", 10, "x".into(), 0)
            .unwrap();
        directory.begin_upload(conn(1), &id).unwrap();

        let departed = directory.disconnect(conn(1));
        assert_eq!(departed.username.as_deref(), Some("ann"));
        assert_eq!(departed.transfer.unwrap().transfer_id, id);
        assert_eq!(directory.connection_of("ann"), None);
        assert_eq!(directory.file(&id).unwrap().progress, None);
    }

    #[test]
    fn test_from_users_rebuilds_queued_files() {
        let mut bob = User::new("bob", "pw");
        bob.files.push_back(FileNotice {
            username: "ann".into(),
            size: 5,
            filename: "x".into(),
            transfer_id: "t-1".into(),
            time: 3,
        });

        let directory = Directory::from_users(vec![User::new("ann", "pw"), bob]);
        let record = directory.file("t-1").unwrap();
        assert_eq!(record.sender, "ann");
        assert_eq!(record.recipient, "bob");
        assert_eq!(directory.usernames(), ["ann", "bob"]);
    }
}
