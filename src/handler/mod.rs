//! Handler module - request decoding, dispatch and replies.
//!
//! Provides:
//! - [`RequestHeader`] / [`Request`] - typed view of a frame header
//! - [`RequestContext`] / [`Reply`] - addressing and building replies
//! - [`Engine`] - executes requests against the session directory
//!
//! # Example
//!
//! ```ignore
//! use chat_relay::handler::{Engine, Flow};
//!
//! while has_complete_frame(&buffer) {
//!     let frame = take_frame(&mut buffer)?;
//!     if engine.handle_frame(conn, &writer, frame).await == Flow::Disconnect {
//!         break;
//!     }
//! }
//! ```

mod context;
mod engine;
mod request;

pub use context::{status, status_for, Reply, RequestContext, PUSH_UUID};
pub use engine::{Engine, Flow};
pub use request::{Action, Request, RequestHeader};
