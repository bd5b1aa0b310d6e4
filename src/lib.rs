//! # chat-relay
//!
//! Connection-oriented messaging and file-relay server.
//!
//! Clients register or log in, see who exists, add friends, exchange text
//! messages and relay files through the server in chunks. Messages and file
//! notices for offline users wait in a backlog that is handed over on every
//! login. The registry is snapshotted to disk on a timer and at shutdown.
//!
//! ## Architecture
//!
//! - **Framing**: `[u32 total_len][u16 header_len][JSON header][body]`,
//!   reassembled in a fixed-capacity ring buffer per connection
//! - **Dispatch**: one exclusive lock around the session directory, held for
//!   the handling of one frame
//! - **Delivery**: replies and pushes go through a bounded queue drained by a
//!   writer task per connection
//!
//! ## Example
//!
//! ```ignore
//! use chat_relay::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .addr("0.0.0.0:8040".parse().unwrap())
//!         .bind()
//!         .await
//!         .unwrap();
//!
//!     server.run(async { tokio::signal::ctrl_c().await.ok(); }).await.unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod timer;
pub mod transport;
pub mod writer;

mod backpressure;
mod server;

pub use config::ServerConfig;
pub use error::RelayError;
pub use server::{Server, ServerBuilder};
