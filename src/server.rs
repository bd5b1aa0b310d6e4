//! Server builder and runtime loop.
//!
//! The [`ServerBuilder`] provides a fluent API over [`ServerConfig`]. The
//! [`Server`] manages the lifecycle:
//! 1. Load the registry snapshot
//! 2. Bind the listener
//! 3. Accept connections, one task each, until shutdown
//! 4. Save the snapshot on the way out
//!
//! # Example
//!
//! ```ignore
//! use chat_relay::Server;
//!
//! #[tokio::main]
//! async fn main() -> chat_relay::error::Result<()> {
//!     let server = Server::builder()
//!         .addr("127.0.0.1:8040".parse().unwrap())
//!         .block_size(8192)
//!         .bind()
//!         .await?;
//!
//!     server.run(async { tokio::signal::ctrl_c().await.ok(); }).await
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::handler::{Engine, Flow};
use crate::protocol::{pending_frame_size, take_frame, FrameBuffer, PREFIX_SIZE};
use crate::session::Directory;
use crate::storage::{BlobStore, SnapshotFile};
use crate::timer::{save_snapshot, SnapshotTimer};
use crate::transport::{ConnectionId, ConnectionRegistry, RelayListener};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Longest a closed connection waits for its queued frames to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for configuring and binding a [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. [`ServerConfig::from_env`].
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Per-connection receive buffer capacity; also the largest frame
    /// accepted.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval = interval;
        self
    }

    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_path = path.into();
        self
    }

    pub fn blob_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.blob_dir = dir.into();
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    pub async fn bind(self) -> Result<Server> {
        Server::bind(self.config).await
    }
}

/// A bound server, ready to [`run`](Server::run).
pub struct Server {
    listener: RelayListener,
    engine: Engine,
    snapshot: SnapshotFile,
    config: ServerConfig,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Load persisted state and bind the listening socket.
    ///
    /// An unreadable snapshot is logged and the server starts empty.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let snapshot = SnapshotFile::new(&config.snapshot_path);
        let users = match snapshot.load().await {
            Ok(users) => users,
            Err(e) => {
                error!(path = %snapshot.path().display(), error = %e, "Snapshot unreadable, starting empty");
                Vec::new()
            }
        };

        let blobs = BlobStore::new(&config.blob_dir).await?;
        let engine = Engine::new(
            Arc::new(Mutex::new(Directory::from_users(users))),
            blobs,
            ConnectionRegistry::new(),
            config.block_size,
        );

        let listener = RelayListener::bind(config.addr, config.backlog)?;
        info!(addr = %listener.local_addr()?, backlog = config.backlog, "Listening");

        Ok(Self {
            listener,
            engine,
            snapshot,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then save a final
    /// snapshot.
    ///
    /// Connections already accepted keep being served by their own tasks.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let timer = SnapshotTimer::spawn(
            self.engine.directory().clone(),
            self.snapshot.clone(),
            self.config.snapshot_interval,
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, conn)) => {
                        info!(conn = %conn, peer = %peer, "Accepted connection");
                        let engine = self.engine.clone();
                        let buffer_capacity = self.config.buffer_capacity;
                        let writer_config = WriterConfig::with_capacity(self.config.outbound_capacity);
                        tokio::spawn(async move {
                            serve_connection(engine, stream, conn, buffer_capacity, writer_config).await;
                        });
                    }
                    Err(e) => error!(error = %e, "Accept failed"),
                },
                _ = &mut shutdown => break,
            }
        }

        info!("Shutting down");
        timer.stop().await;
        if let Err(e) = save_snapshot(self.engine.directory(), &self.snapshot).await {
            error!(path = %self.snapshot.path().display(), error = %e, "Final snapshot failed");
        }
        Ok(())
    }
}

/// Read loop for one connection.
///
/// Bytes are read straight into the ring buffer, never more than it has
/// room for, and every complete frame is handled in arrival order. A frame
/// that could never fit the buffer is discarded as it streams in.
async fn serve_connection(
    engine: Engine,
    stream: TcpStream,
    conn: ConnectionId,
    buffer_capacity: usize,
    writer_config: WriterConfig,
) {
    let (mut reader, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer_task(write_half, writer_config);
    engine.connections().insert(conn, writer.clone()).await;

    let mut buffer = FrameBuffer::with_capacity(buffer_capacity.max(PREFIX_SIZE));
    let mut scratch = vec![0u8; buffer.capacity()];
    // Bytes of an oversized frame still to be thrown away.
    let mut discard = 0usize;

    'read: loop {
        let room = buffer.remaining();
        if room == 0 {
            warn!(conn = %conn, "Receive buffer stalled, resetting");
            buffer.clear();
            continue;
        }

        let n = match reader.read(&mut scratch[..room]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(conn = %conn, error = %e, "Read failed");
                break;
            }
        };

        let mut input = &scratch[..n];
        if discard > 0 {
            let dropped = discard.min(input.len());
            discard -= dropped;
            input = &input[dropped..];
        }
        if let Err(e) = buffer.put(input) {
            warn!(conn = %conn, error = %e, "Receive buffer overflow, resetting");
            buffer.clear();
            continue;
        }

        while let Some(size) = pending_frame_size(&buffer) {
            if size > buffer.capacity() {
                // Everything buffered belongs to this frame.
                discard = size - buffer.occupancy();
                buffer.clear();
                warn!(conn = %conn, size, capacity = buffer.capacity(), "Discarding oversized frame");
                break;
            }
            if buffer.occupancy() < size {
                break;
            }

            let frame = match take_frame(&mut buffer) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(conn = %conn, error = %e, "Skipping malformed frame");
                    continue;
                }
            };
            if engine.handle_frame(conn, &writer, frame).await == Flow::Disconnect {
                break 'read;
            }
        }
    }

    engine.disconnect(conn).await;
    debug!(conn = %conn, pending = writer.pending_count(), "Writer draining");
    drop(writer);
    let _ = reap_writer(conn, writer_task).await;
    info!(conn = %conn, "Connection closed");
}

/// Wait for a connection's writer task to finish and log how it ended.
///
/// The task is aborted if it has not drained within [`WRITER_DRAIN_TIMEOUT`].
async fn reap_writer(conn: ConnectionId, mut task: JoinHandle<Result<()>>) -> Result<()> {
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(Ok(()))) => {
            debug!(conn = %conn, "Writer finished");
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            warn!(conn = %conn, error = %e, "Writer failed");
            Err(e)
        }
        Ok(Err(e)) => {
            error!(conn = %conn, error = %e, "Writer task panicked");
            Err(RelayError::ConnectionClosed)
        }
        Err(_) => {
            warn!(conn = %conn, "Writer did not drain in time, aborting");
            task.abort();
            Err(RelayError::ConnectionClosed)
        }
    }
}
