//! Connection identities and the table of live outbound queues.
//!
//! Sessions refer to connections only by [`ConnectionId`]; the registry maps
//! an id to the [`WriterHandle`] feeding that socket so pushes can be
//! delivered to other connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::writer::WriterHandle;

/// Opaque handle for one accepted connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Issues increasing connection ids, starting at 1.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Live connections and their outbound queues.
///
/// Cheaply cloneable; clones share the same table.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    writers: Arc<RwLock<HashMap<ConnectionId, WriterHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, conn: ConnectionId, writer: WriterHandle) {
        self.writers.write().await.insert(conn, writer);
    }

    pub async fn remove(&self, conn: ConnectionId) -> Option<WriterHandle> {
        self.writers.write().await.remove(&conn)
    }

    /// Outbound queue of `conn`, if it is still connected.
    pub async fn get(&self, conn: ConnectionId) -> Option<WriterHandle> {
        self.writers.read().await.get(&conn).cloned()
    }
}
