//! Request execution against the shared session state.
//!
//! One frame is handled as a unit: the directory lock is taken, the request
//! is decoded and executed (blob I/O included), and the lock is released.
//! Only then are the reply and any pushes queued on writer tasks, so a slow
//! peer never holds up other connections while the lock is taken.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::context::{Reply, RequestContext};
use super::request::{Action, Request, RequestHeader};
use crate::error::{RelayError, Result};
use crate::protocol::Frame;
use crate::session::{Delivery, Directory, FileNotice, Message};
use crate::storage::BlobStore;
use crate::transport::{ConnectionId, ConnectionRegistry};
use crate::writer::WriterHandle;

/// What the connection's read loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The connection hit a fatal error; stop reading and clean up.
    Disconnect,
}

/// Payload of a push to another connection.
#[derive(Debug, Clone)]
enum PushItem {
    /// `username` added the recipient as a friend.
    Friend(String),
    Message(Message),
    File(FileNotice),
}

#[derive(Debug, Clone)]
struct Push {
    conn: ConnectionId,
    recipient: String,
    item: PushItem,
}

impl Push {
    fn action(&self) -> Action {
        match self.item {
            PushItem::Friend(_) => Action::AddFriend,
            PushItem::Message(_) => Action::SendMessage,
            PushItem::File(_) => Action::SendFileDataEnd,
        }
    }

    fn reply(&self) -> Result<Reply> {
        let reply = Reply::push(self.action());
        Ok(match &self.item {
            PushItem::Friend(username) => reply.field("username", username.as_str()),
            PushItem::Message(message) => reply.field("message", to_json(message)?),
            PushItem::File(notice) => reply.field("file", to_json(notice)?),
        })
    }
}

/// Result of executing one request under the lock.
struct Handled {
    reply: Reply,
    pushes: Vec<Push>,
    /// Half-close the write side once the reply is flushed.
    close: bool,
}

impl Handled {
    fn reply(reply: Reply) -> Self {
        Self {
            reply,
            pushes: Vec::new(),
            close: false,
        }
    }

    fn with_push(mut self, push: Option<Push>) -> Self {
        self.pushes.extend(push);
        self
    }

    fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

/// Shared request engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    directory: Arc<Mutex<Directory>>,
    blobs: BlobStore,
    connections: ConnectionRegistry,
    block_size: usize,
}

impl Engine {
    pub fn new(
        directory: Arc<Mutex<Directory>>,
        blobs: BlobStore,
        connections: ConnectionRegistry,
        block_size: usize,
    ) -> Self {
        Self {
            directory,
            blobs,
            connections,
            block_size: block_size.max(1),
        }
    }

    pub fn directory(&self) -> &Arc<Mutex<Directory>> {
        &self.directory
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Handle one complete frame from `conn` and queue everything it
    /// produces.
    pub async fn handle_frame(&self, conn: ConnectionId, writer: &WriterHandle, frame: Frame) -> Flow {
        let header = match RequestHeader::parse(frame.header()) {
            Ok(header) => header,
            Err(e) => {
                warn!(conn = %conn, error = %e, "Dropping request without a usable uuid");
                return Flow::Continue;
            }
        };
        let ctx = RequestContext::new(conn, header.uuid(), header.raw_action().clone());

        let result = {
            let mut directory = self.directory.lock().await;
            match header.decode() {
                Ok(request) => {
                    debug!(conn = %conn, action = ?request.action(), uuid = %ctx.uuid(), "Request");
                    self.execute(&mut directory, &ctx, request, frame.body).await
                }
                Err(e) => Err(e),
            }
        };

        let (handled, flow) = match result {
            Ok(handled) => (handled, Flow::Continue),
            Err(e) => {
                let fatal = matches!(e, RelayError::Io(_));
                if fatal {
                    error!(conn = %conn, error = %e, "Storage failure, closing connection");
                } else {
                    warn!(conn = %conn, action = ?ctx.action(), error = %e, "Request failed");
                }
                let handled = Handled {
                    reply: ctx.error(&e),
                    pushes: Vec::new(),
                    close: fatal,
                };
                (handled, if fatal { Flow::Disconnect } else { Flow::Continue })
            }
        };

        self.respond(conn, writer, handled.reply, handled.close).await;
        for push in handled.pushes {
            self.deliver(push).await;
        }

        flow
    }

    /// Drop every binding `conn` holds.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let departed = self.directory.lock().await.disconnect(conn);
        self.connections.remove(conn).await;

        debug!(
            conn = %conn,
            user = departed.username.as_deref().unwrap_or("-"),
            transfer = departed.transfer.as_ref().map(|t| t.transfer_id.as_str()).unwrap_or("-"),
            "Connection state cleared"
        );
    }

    async fn respond(&self, conn: ConnectionId, writer: &WriterHandle, reply: Reply, close: bool) {
        let sent = match reply.into_frame() {
            Ok(frame) => writer.send(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(conn = %conn, error = %e, "Failed to queue reply");
        }

        if close {
            if let Err(e) = writer.close().await {
                debug!(conn = %conn, error = %e, "Writer already closed");
            }
        }
    }

    /// Queue a push on its recipient's connection, falling back to the
    /// recipient's backlog when that fails.
    async fn deliver(&self, push: Push) {
        let queued = match self.connections.get(push.conn).await {
            Some(writer) => push
                .reply()
                .and_then(Reply::into_frame)
                .and_then(|frame| writer.try_send(frame)),
            None => Err(RelayError::ConnectionClosed),
        };

        let Err(e) = queued else {
            return;
        };
        warn!(conn = %push.conn, user = %push.recipient, error = %e, "Push failed");

        let mut directory = self.directory.lock().await;
        let requeued = match push.item {
            PushItem::Message(message) => directory.enqueue_message(&push.recipient, message),
            PushItem::File(notice) => directory.enqueue_file(&push.recipient, notice),
            PushItem::Friend(_) => return,
        };
        if let Err(e) = requeued {
            error!(user = %push.recipient, error = %e, "Could not requeue undelivered push");
        }
    }

    async fn execute(
        &self,
        directory: &mut Directory,
        ctx: &RequestContext,
        request: Request,
        body: Bytes,
    ) -> Result<Handled> {
        let conn = ctx.conn();

        match request {
            Request::Register { username, password } => {
                directory.register(conn, &username, &password)?;
                Ok(Handled::reply(ctx.success()))
            }

            Request::Login { username, password } => {
                let backlog = directory.login(conn, &username, &password)?;
                debug!(
                    conn = %conn,
                    user = %username,
                    messages = backlog.messages.len(),
                    files = backlog.files.len(),
                    "Logged in"
                );
                let reply = ctx
                    .success()
                    .field("friends", backlog.friends)
                    .field("messages", to_json(&backlog.messages)?)
                    .field("files", to_json(&backlog.files)?);
                Ok(Handled::reply(reply))
            }

            Request::Quit => {
                let username = directory.quit(conn)?;
                debug!(conn = %conn, user = %username, "Logged out");
                Ok(Handled::reply(ctx.success()))
            }

            Request::Search => {
                let users: Vec<Value> = directory
                    .usernames()
                    .into_iter()
                    .map(|username| serde_json::json!({ "username": username }))
                    .collect();
                Ok(Handled::reply(ctx.success().field("users", users)))
            }

            Request::AddFriend { users } => {
                let (subject, notify) = directory.add_friends(conn, &users)?;
                let mut handled = Handled::reply(ctx.success());
                handled.pushes = notify
                    .into_iter()
                    .map(|(recipient, target_conn)| Push {
                        conn: target_conn,
                        recipient,
                        item: PushItem::Friend(subject.clone()),
                    })
                    .collect();
                Ok(handled)
            }

            Request::SendMessage {
                target,
                message,
                time,
            } => {
                let time = time.unwrap_or_else(now);
                let delivery = directory.send_message(conn, &target, message, time)?;
                Ok(Handled::reply(ctx.success()).with_push(push_of(delivery, PushItem::Message)))
            }

            Request::SendFile {
                target,
                size,
                filename,
            } => {
                let id = directory.announce_file(conn, &target, size, filename, now())?;
                debug!(conn = %conn, transfer = %id, size, "File announced");
                Ok(Handled::reply(ctx.success().field("transferId", id)))
            }

            Request::SendFileDataStart { transfer_id } => {
                directory.file(&transfer_id)?;
                self.blobs.create(&transfer_id).await?;
                directory.begin_upload(conn, &transfer_id)?;
                Ok(Handled::reply(ctx.success()))
            }

            Request::SendFileData => {
                let id = directory.active_upload(conn)?.to_string();
                self.blobs.append(&id, &body).await?;
                directory.record_upload(conn, body.len() as u64)?;
                Ok(Handled::reply(ctx.success()))
            }

            Request::SendFileDataEnd => {
                let delivery = directory.finish_upload(conn)?;
                Ok(Handled::reply(ctx.success())
                    .with_push(push_of(delivery, PushItem::File))
                    .closing())
            }

            Request::ReceiveFileDataStart { transfer_id } => {
                directory.begin_download(conn, &transfer_id)?;
                Ok(Handled::reply(ctx.success()))
            }

            Request::ReceiveFileData => {
                let cursor = directory.download_cursor(conn)?;
                let left = cursor.size.saturating_sub(cursor.offset);
                let want = left.min(self.block_size as u64) as usize;

                let chunk = self
                    .blobs
                    .read_at(&cursor.transfer_id, cursor.offset, want)
                    .await?;
                if chunk.len() < want {
                    return Err(RelayError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "Blob {} ends before its declared size {}",
                            cursor.transfer_id, cursor.size
                        ),
                    )));
                }
                directory.advance_download(conn, chunk.len() as u64)?;

                let reply = ctx
                    .success()
                    .field("size", chunk.len())
                    .field("remaining", left - chunk.len() as u64)
                    .body(chunk);
                Ok(Handled::reply(reply))
            }

            Request::ReceiveFileDataEnd => {
                directory.finish_download(conn)?;
                Ok(Handled::reply(ctx.success()).closing())
            }
        }
    }
}

fn push_of<T>(delivery: Delivery<T>, wrap: fn(T) -> PushItem) -> Option<Push> {
    match delivery {
        Delivery::Push {
            conn,
            recipient,
            item,
        } => Some(Push {
            conn,
            recipient,
            item: wrap(item),
        }),
        Delivery::Queued => None,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Current time in epoch seconds.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::handler::status;
    use crate::protocol::{build_frame, take_frame, FrameBuffer};
    use crate::writer::spawn_writer_task_default;
    use serde_json::{json, Map};
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    struct Harness {
        engine: Engine,
        _dir: tempfile::TempDir,
    }

    struct Peer {
        conn: ConnectionId,
        writer: WriterHandle,
        stream: DuplexStream,
        buffer: FrameBuffer,
    }

    async fn harness(block_size: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path()).await.unwrap();
        let engine = Engine::new(
            Arc::new(Mutex::new(Directory::new())),
            blobs,
            ConnectionRegistry::new(),
            block_size,
        );
        Harness { engine, _dir: dir }
    }

    async fn connect(engine: &Engine, id: u64) -> Peer {
        let (local, stream) = duplex(1 << 16);
        let (writer, _task) = spawn_writer_task_default(local);
        let conn = ConnectionId::from_raw(id);
        engine.connections().insert(conn, writer.clone()).await;
        Peer {
            conn,
            writer,
            stream,
            buffer: FrameBuffer::with_capacity(1 << 16),
        }
    }

    impl Peer {
        async fn send(&self, engine: &Engine, header: Value, body: &[u8]) -> Flow {
            let bytes = build_frame(header.to_string().as_bytes(), body).unwrap();
            let mut buffer = FrameBuffer::with_capacity(bytes.len());
            buffer.put(&bytes).unwrap();
            let frame = take_frame(&mut buffer).unwrap();
            engine.handle_frame(self.conn, &self.writer, frame).await
        }

        async fn recv(&mut self) -> (Map<String, Value>, Bytes) {
            loop {
                if crate::protocol::has_complete_frame(&self.buffer) {
                    let frame = take_frame(&mut self.buffer).unwrap();
                    let header = JsonCodec::decode_object(frame.header()).unwrap();
                    return (header, frame.body);
                }
                let mut chunk = [0u8; 1024];
                let n = self.stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "stream closed");
                self.buffer.put(&chunk[..n]).unwrap();
            }
        }

        async fn call(&mut self, engine: &Engine, header: Value) -> Map<String, Value> {
            self.send(engine, header, b"").await;
            self.recv().await.0
        }
    }

    #[tokio::test]
    async fn test_register_and_search() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;

        for name in ["zed", "ann"] {
            let reply = ann
                .call(&h.engine, json!({"action": 0, "uuid": name, "username": name, "password": "pw"}))
                .await;
            assert_eq!(reply["status"], status::SUCCESS);
            assert_eq!(reply["uuid"], name);
        }

        let reply = ann.call(&h.engine, json!({"action": 3, "uuid": "s"})).await;
        assert_eq!(reply["users"], json!([{"username": "ann"}, {"username": "zed"}]));
    }

    #[tokio::test]
    async fn test_unknown_identity_gets_error_reply() {
        let h = harness(4).await;
        let mut peer = connect(&h.engine, 1).await;

        let reply = peer
            .call(
                &h.engine,
                json!({"action": 5, "uuid": "m", "message": {"username": "bob", "message": "hi"}}),
            )
            .await;
        assert_eq!(reply["status"], status::NOT_LOGGED_IN);
        assert!(reply["error"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_request_reply() {
        let h = harness(4).await;
        let mut peer = connect(&h.engine, 1).await;

        let reply = peer.call(&h.engine, json!({"action": 42, "uuid": "x"})).await;
        assert_eq!(reply["status"], status::MALFORMED);
        assert_eq!(reply["action"], 42);

        // No uuid: dropped without a reply.
        assert_eq!(peer.send(&h.engine, json!({"action": 3}), b"").await, Flow::Continue);
        let reply = peer.call(&h.engine, json!({"action": 3, "uuid": "after"})).await;
        assert_eq!(reply["uuid"], "after");
    }

    #[tokio::test]
    async fn test_add_friend_with_no_users_is_malformed() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "1", "username": "ann", "password": "a"}))
            .await;

        let reply = ann
            .call(&h.engine, json!({"action": 4, "uuid": "2", "users": []}))
            .await;
        assert_eq!(reply["status"], status::MALFORMED);
    }

    #[tokio::test]
    async fn test_message_push_to_online_peer() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;
        let mut bob = connect(&h.engine, 2).await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "1", "username": "ann", "password": "a"}))
            .await;
        bob.call(&h.engine, json!({"action": 0, "uuid": "2", "username": "bob", "password": "b"}))
            .await;

        let reply = ann
            .call(
                &h.engine,
                json!({"action": 5, "uuid": "3", "message": {"username": "bob", "message": "hey", "time": 7}}),
            )
            .await;
        assert_eq!(reply["status"], status::SUCCESS);

        let (push, _) = bob.recv().await;
        assert_eq!(push["uuid"], "message");
        assert_eq!(push["action"], 5);
        assert_eq!(push["message"], json!({"username": "ann", "message": "hey", "time": 7}));

        let directory = h.engine.directory().lock().await;
        assert!(directory.user("bob").unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_failed_push_falls_back_to_backlog() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;
        let mut bob = connect(&h.engine, 2).await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "1", "username": "ann", "password": "a"}))
            .await;
        bob.call(&h.engine, json!({"action": 0, "uuid": "2", "username": "bob", "password": "b"}))
            .await;

        // Bob's socket is gone but the read loop has not noticed yet.
        h.engine.connections().remove(bob.conn).await;

        ann.call(
            &h.engine,
            json!({"action": 5, "uuid": "3", "message": {"username": "bob", "message": "later"}}),
        )
        .await;

        let directory = h.engine.directory().lock().await;
        let backlog = &directory.user("bob").unwrap().messages;
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].message, "later");
    }

    #[tokio::test]
    async fn test_file_round_trip_with_partial_last_block() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "1", "username": "ann", "password": "a"}))
            .await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "2", "username": "bob", "password": "b"}))
            .await;
        ann.call(&h.engine, json!({"action": 1, "uuid": "3", "username": "ann", "password": "a"}))
            .await;

        let data = b"0123456789";
        let reply = ann
            .call(
                &h.engine,
                json!({"action": 6, "uuid": "4", "file": {"username": "bob", "size": 10, "filename": "d.txt"}}),
            )
            .await;
        let id = reply["transferId"].as_str().unwrap().to_string();

        let mut uploader = connect(&h.engine, 10).await;
        uploader
            .call(&h.engine, json!({"action": 7, "uuid": "5", "transferId": id}))
            .await;
        for chunk in data.chunks(3) {
            uploader.send(&h.engine, json!({"action": 8, "uuid": "6"}), chunk).await;
            assert_eq!(uploader.recv().await.0["status"], 0);
        }
        let reply = uploader.call(&h.engine, json!({"action": 9, "uuid": "7"})).await;
        assert_eq!(reply["status"], 0);

        let mut downloader = connect(&h.engine, 11).await;
        downloader
            .call(&h.engine, json!({"action": 10, "uuid": "8", "transferId": id}))
            .await;
        let mut received = Vec::new();
        let mut sizes = Vec::new();
        loop {
            downloader.send(&h.engine, json!({"action": 11, "uuid": "9"}), b"").await;
            let (header, body) = downloader.recv().await;
            assert_eq!(header["size"], body.len());
            received.extend_from_slice(&body);
            sizes.push(body.len());
            if header["remaining"] == 0 {
                break;
            }
        }
        downloader.call(&h.engine, json!({"action": 12, "uuid": "10"})).await;

        assert_eq!(received, data);
        assert_eq!(sizes, [4, 4, 2]);
    }

    #[tokio::test]
    async fn test_upload_data_without_start() {
        let h = harness(4).await;
        let mut peer = connect(&h.engine, 1).await;

        peer.send(&h.engine, json!({"action": 8, "uuid": "d"}), b"abc").await;
        let (reply, _) = peer.recv().await;
        assert_eq!(reply["status"], status::TRANSFER_NOT_ACTIVE);
    }

    #[tokio::test]
    async fn test_missing_blob_is_fatal() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "1", "username": "ann", "password": "a"}))
            .await;
        let reply = ann
            .call(
                &h.engine,
                json!({"action": 6, "uuid": "2", "file": {"username": "ann", "size": 8, "filename": "x"}}),
            )
            .await;
        let id = reply["transferId"].as_str().unwrap().to_string();

        ann.call(&h.engine, json!({"action": 10, "uuid": "3", "transferId": id}))
            .await;
        let flow = ann.send(&h.engine, json!({"action": 11, "uuid": "4"}), b"").await;
        assert_eq!(flow, Flow::Disconnect);
        assert_eq!(ann.recv().await.0["status"], status::STORAGE_ERROR);
    }

    #[tokio::test]
    async fn test_disconnect_unbinds() {
        let h = harness(4).await;
        let mut ann = connect(&h.engine, 1).await;
        ann.call(&h.engine, json!({"action": 0, "uuid": "1", "username": "ann", "password": "a"}))
            .await;

        h.engine.disconnect(ann.conn).await;

        assert!(h.engine.connections().get(ann.conn).await.is_none());
        assert_eq!(h.engine.directory().lock().await.connection_of("ann"), None);
    }
}
