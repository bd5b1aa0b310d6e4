//! Transport module - TCP accept and per-connection bookkeeping.
//!
//! Provides:
//! - [`RelayListener`]: bind/listen with a configurable backlog
//! - [`ConnectionId`]: process-unique id issued at accept time
//! - [`ConnectionRegistry`]: id → outbound queue, for cross-connection pushes

mod connection;
mod listener;

pub use connection::{ConnectionId, ConnectionIds, ConnectionRegistry};
pub use listener::RelayListener;
