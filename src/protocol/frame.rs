//! Frame struct with typed accessors.
//!
//! Represents one complete protocol message: a structured header (the
//! request or response field set) and an opaque body (file chunk bytes).
//! Uses `bytes::Bytes` for zero-copy sharing.
//!
//! # Example
//!
//! ```
//! use chat_relay::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Bytes::from_static(b"{}"), Bytes::from_static(b"chunk"));
//!
//! assert_eq!(frame.header(), b"{}");
//! assert_eq!(frame.body(), b"chunk");
//! ```

use bytes::Bytes;

use super::wire_format::{encode_prefix, PREFIX_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Encoded header field set.
    pub header: Bytes,
    /// Body bytes, empty for header-only frames.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Bytes, body: Bytes) -> Self {
        Self { header, body }
    }

    #[inline]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

}

/// Build a complete frame as a single byte vector.
///
/// Use the writer's `OutboundFrame` for scatter/gather sends.
///
/// # Example
///
/// ```
/// use chat_relay::protocol::build_frame;
///
/// let bytes = build_frame(b"{}", b"abc").unwrap();
/// assert_eq!(bytes.len(), 6 + 2 + 3);
/// ```
pub fn build_frame(header: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    let prefix = encode_prefix(header.len(), body.len())?;
    let mut buf = Vec::with_capacity(PREFIX_SIZE + header.len() + body.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(header);
    buf.extend_from_slice(body);
    Ok(buf)
}
