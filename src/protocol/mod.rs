//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary framing layer:
//! - Ring buffer for accumulating partial socket reads
//! - `[u32 total_len][u16 header_len][header][body]` prefix encoding
//! - Frame discovery (peek the length, dequeue only complete frames)

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::{FrameBuffer, DEFAULT_CAPACITY};
pub use wire_format::{
    encode_prefix, has_complete_frame, pending_frame_size, take_frame,
    HEADER_LENGTH_FIELD_SIZE, LENGTH_FIELD_SIZE, MAX_HEADER_SIZE, PREFIX_SIZE,
};
