//! Codec module - serialization of frame headers.
//!
//! - [`JsonCodec`] - JSON via `serde_json`, used for every header field set
//!
//! Frame bodies (file chunks) are raw bytes and bypass the codec entirely.
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods rather than trait objects.

mod json;

pub use json::JsonCodec;
