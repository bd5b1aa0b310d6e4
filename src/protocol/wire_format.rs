//! Wire format encoding and decoding.
//!
//! Every frame is length-prefixed:
//! ```text
//! ┌───────────┬────────────┬──────────────┬────────────┐
//! │ total_len │ header_len │ header bytes │ body bytes │
//! │ u32 LE    │ u16 LE     │ header_len   │ remainder  │
//! └───────────┴────────────┴──────────────┴────────────┘
//! ```
//!
//! `total_len` excludes its own 4 bytes and equals
//! `2 + header_len + body_len`. Header-only frames have `body_len = 0`.

use bytes::Bytes;

use super::{Frame, FrameBuffer};
use crate::error::{RelayError, Result};

/// Width of the `total_len` field.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Width of the `header_len` field.
pub const HEADER_LENGTH_FIELD_SIZE: usize = 2;

/// Size of the complete fixed prefix (`total_len` + `header_len`).
pub const PREFIX_SIZE: usize = LENGTH_FIELD_SIZE + HEADER_LENGTH_FIELD_SIZE;

/// Largest header the `u16` length field can describe.
pub const MAX_HEADER_SIZE: usize = u16::MAX as usize;

/// Encode the 6-byte prefix for a frame with the given section sizes.
///
/// # Errors
///
/// Returns a protocol error if the header exceeds 65535 bytes or the frame
/// would not fit a `u32` length.
///
/// # Example
///
/// ```
/// use chat_relay::protocol::encode_prefix;
///
/// let prefix = encode_prefix(3, 5).unwrap();
/// assert_eq!(&prefix[..4], &10u32.to_le_bytes());
/// assert_eq!(&prefix[4..], &3u16.to_le_bytes());
/// ```
pub fn encode_prefix(header_len: usize, body_len: usize) -> Result<[u8; PREFIX_SIZE]> {
    if header_len > MAX_HEADER_SIZE {
        return Err(RelayError::Protocol(format!(
            "Header size {} exceeds maximum {}",
            header_len, MAX_HEADER_SIZE
        )));
    }

    let total = HEADER_LENGTH_FIELD_SIZE + header_len + body_len;
    let total = u32::try_from(total)
        .map_err(|_| RelayError::Protocol(format!("Frame size {} exceeds u32", total)))?;

    let mut prefix = [0u8; PREFIX_SIZE];
    prefix[..LENGTH_FIELD_SIZE].copy_from_slice(&total.to_le_bytes());
    prefix[LENGTH_FIELD_SIZE..].copy_from_slice(&(header_len as u16).to_le_bytes());
    Ok(prefix)
}

/// Number of bytes the frame at the read cursor occupies, length field
/// included, or `None` if not even the length field has arrived.
pub fn pending_frame_size(buffer: &FrameBuffer) -> Option<usize> {
    buffer
        .peek_u32_le()
        .map(|len| LENGTH_FIELD_SIZE + len as usize)
}

/// Check whether a complete frame is buffered at the read cursor.
///
/// Only peeks; never consumes.
pub fn has_complete_frame(buffer: &FrameBuffer) -> bool {
    matches!(pending_frame_size(buffer), Some(size) if buffer.occupancy() >= size)
}

/// Dequeue one complete frame.
///
/// The caller must have checked [`has_complete_frame`]. A frame whose
/// `total_len` or `header_len` is inconsistent is still consumed in full so
/// the stream stays aligned, and a protocol error is returned.
pub fn take_frame(buffer: &mut FrameBuffer) -> Result<Frame> {
    if !has_complete_frame(buffer) {
        return Err(RelayError::Protocol("No complete frame buffered".to_string()));
    }

    let total = buffer.get_u32_le()? as usize;
    if total < HEADER_LENGTH_FIELD_SIZE {
        buffer.skip(total);
        return Err(RelayError::Protocol(format!(
            "Frame length {} shorter than header length field",
            total
        )));
    }

    let header_len = buffer.get_u16_le()? as usize;
    let sections = total - HEADER_LENGTH_FIELD_SIZE;
    if header_len > sections {
        buffer.skip(sections);
        return Err(RelayError::Protocol(format!(
            "Header length {} exceeds frame length {}",
            header_len, sections
        )));
    }

    let header = buffer.get_bytes(header_len)?;
    let body = match sections - header_len {
        0 => Bytes::new(),
        n => buffer.get_bytes(n)?,
    };

    Ok(Frame::new(header, body))
}
