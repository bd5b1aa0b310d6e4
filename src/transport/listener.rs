//! TCP listener with an explicit accept backlog.
//!
//! # Example
//!
//! ```ignore
//! use chat_relay::transport::RelayListener;
//!
//! let listener = RelayListener::bind("127.0.0.1:8040".parse()?, 20)?;
//! let (stream, peer, conn) = listener.accept().await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::connection::{ConnectionId, ConnectionIds};
use crate::error::Result;

/// Listening socket that tags every accepted stream with a fresh
/// [`ConnectionId`].
pub struct RelayListener {
    listener: TcpListener,
    ids: ConnectionIds,
}

impl RelayListener {
    /// Bind `addr` with address reuse enabled and start listening.
    pub fn bind(addr: SocketAddr, backlog: u32) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;

        Ok(Self {
            listener,
            ids: ConnectionIds::new(),
        })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionId)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer, self.ids.issue()))
    }

    /// Address actually bound; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_issues_distinct_ids() {
        let listener = RelayListener::bind("127.0.0.1:0".parse().unwrap(), 4).unwrap();
        let addr = listener.local_addr().unwrap();

        let _a = TcpStream::connect(addr).await.unwrap();
        let (_, _, first) = listener.accept().await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        let (_, _, second) = listener.accept().await.unwrap();

        assert_ne!(first, second);
    }
}
