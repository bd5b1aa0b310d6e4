//! Fixed-capacity ring buffer for accumulating socket reads.
//!
//! Bytes arrive from the socket in arbitrary slices and are appended at the
//! write cursor; frames are consumed from the read cursor once the length
//! prefix says they are complete. Every access that crosses the end of the
//! backing storage is split into two contiguous copies (tail, then head), so
//! peeks, reads and appends all behave the same across wrap-around.
//!
//! # Example
//!
//! ```
//! use chat_relay::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::with_capacity(8);
//! buffer.put(&7u32.to_le_bytes()).unwrap();
//! buffer.put(b"ab").unwrap();
//!
//! assert_eq!(buffer.peek_u32_le(), Some(7));
//! assert_eq!(buffer.get_u32_le().unwrap(), 7);
//! assert_eq!(&buffer.get_bytes(2).unwrap()[..], b"ab");
//! assert!(buffer.is_empty());
//! ```

use bytes::Bytes;

use crate::error::{RelayError, Result};

/// Default capacity, large enough for one full-size file chunk frame.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Circular byte store with read/write cursors and an occupancy counter.
///
/// Single reader, single writer: one instance belongs to one connection's
/// receive loop.
pub struct FrameBuffer {
    storage: Box<[u8]>,
    /// Next byte to consume.
    read: usize,
    /// Next slot to fill.
    write: usize,
    /// Bytes currently held.
    len: usize,
}

macro_rules! get_le {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self) -> Result<$ty> {
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            self.get_into(&mut raw)?;
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

impl FrameBuffer {
    /// Create a buffer with the default capacity (8 KiB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "FrameBuffer capacity must be non-zero");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            len: 0,
        }
    }

    /// Total size of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of buffered bytes not yet consumed.
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.len
    }

    /// Free space, i.e. `capacity() - occupancy()`.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.storage.len() - self.len
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append bytes at the write cursor.
    ///
    /// Fails without writing anything if `data` does not fit.
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.remaining() {
            return Err(RelayError::BufferOverflow {
                needed: data.len(),
                available: self.remaining(),
            });
        }

        let tail = self.storage.len() - self.write;
        if data.len() <= tail {
            self.storage[self.write..self.write + data.len()].copy_from_slice(data);
        } else {
            let (first, second) = data.split_at(tail);
            self.storage[self.write..].copy_from_slice(first);
            self.storage[..second.len()].copy_from_slice(second);
        }

        self.write = (self.write + data.len()) % self.storage.len();
        self.len += data.len();
        Ok(())
    }

    /// Consume exactly `n` bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<Bytes> {
        let mut out = vec![0u8; n];
        self.get_into(&mut out)?;
        Ok(Bytes::from(out))
    }

    /// Consume and discard up to `n` bytes, returning how many were dropped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.advance_read(n);
        n
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.len = 0;
    }

    /// Consume a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        let mut raw = [0u8; 1];
        self.get_into(&mut raw)?;
        Ok(raw[0])
    }

    /// Consume a single signed byte.
    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.get_u8()? as i8)
    }

    get_le!(
        /// Consume a little-endian `u16`.
        get_u16_le, u16
    );
    get_le!(
        /// Consume a little-endian `i16`.
        get_i16_le, i16
    );
    get_le!(
        /// Consume a little-endian `u32`.
        get_u32_le, u32
    );
    get_le!(
        /// Consume a little-endian `i32`.
        get_i32_le, i32
    );
    get_le!(
        /// Consume a little-endian `u64`.
        get_u64_le, u64
    );
    get_le!(
        /// Consume a little-endian `i64`.
        get_i64_le, i64
    );

    /// Peek a little-endian `u16` at the read cursor without consuming it.
    ///
    /// Returns `None` if fewer than 2 bytes are buffered.
    pub fn peek_u16_le(&self) -> Option<u16> {
        let mut raw = [0u8; 2];
        self.peek_into(&mut raw).then(|| u16::from_le_bytes(raw))
    }

    /// Peek a little-endian `u32` at the read cursor without consuming it.
    ///
    /// Returns `None` if fewer than 4 bytes are buffered.
    pub fn peek_u32_le(&self) -> Option<u32> {
        let mut raw = [0u8; 4];
        self.peek_into(&mut raw).then(|| u32::from_le_bytes(raw))
    }

    /// Copy `dst.len()` bytes from the read cursor and advance it.
    fn get_into(&mut self, dst: &mut [u8]) -> Result<()> {
        if !self.peek_into(dst) {
            return Err(RelayError::BufferUnderflow {
                needed: dst.len(),
                available: self.len,
            });
        }
        self.advance_read(dst.len());
        Ok(())
    }

    /// Copy `dst.len()` bytes from the read cursor, leaving it in place.
    fn peek_into(&self, dst: &mut [u8]) -> bool {
        let n = dst.len();
        if n > self.len {
            return false;
        }

        let tail = self.storage.len() - self.read;
        if n <= tail {
            dst.copy_from_slice(&self.storage[self.read..self.read + n]);
        } else {
            dst[..tail].copy_from_slice(&self.storage[self.read..]);
            dst[tail..].copy_from_slice(&self.storage[..n - tail]);
        }
        true
    }

    fn advance_read(&mut self, n: usize) {
        self.read = (self.read + n) % self.storage.len();
        self.len -= n;
        if self.len == 0 {
            // Empty: restart at zero so the next frame is contiguous.
            self.read = 0;
            self.write = 0;
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.capacity())
            .field("occupancy", &self.len)
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
