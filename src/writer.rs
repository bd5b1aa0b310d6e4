//! Dedicated writer task per connection.
//!
//! Responses and pushes for a connection never touch its socket directly.
//! They are queued on an mpsc channel and a single task drains it, which
//! keeps frames from different producers from interleaving on the wire and
//! lets several queued frames go out in one `writev`.
//!
//! # Architecture
//!
//! ```text
//! own request handling ─┐
//! pushes from peers    ─┼─► mpsc::Sender<Outbound> ─► Writer Task ─► TCP write half
//! close after response ─┘
//! ```

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backpressure::{BackpressureController, DEFAULT_MAX_PENDING, DEFAULT_TIMEOUT};
use crate::error::{RelayError, Result};
use crate::protocol::{encode_prefix, PREFIX_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded `[total_len][header_len]` prefix.
    pub prefix: [u8; PREFIX_SIZE],
    pub header: Bytes,
    /// Empty for header-only frames.
    pub body: Bytes,
}

impl OutboundFrame {
    pub fn new(header: Bytes, body: Bytes) -> Result<Self> {
        Ok(Self {
            prefix: encode_prefix(header.len(), body.len())?,
            header,
            body,
        })
    }

    /// Total size on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        PREFIX_SIZE + self.header.len() + self.body.len()
    }

    fn sections(&self) -> [&[u8]; 3] {
        [&self.prefix[..], &self.header[..], &self.body[..]]
    }
}

/// Item on a writer channel.
#[derive(Debug)]
enum Outbound {
    Frame(OutboundFrame),
    /// Flush what is queued ahead, then shut the write half down.
    Close,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum queued frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Timeout when a response waits for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl WriterConfig {
    pub fn with_capacity(max_pending_frames: usize) -> Self {
        Self {
            max_pending_frames: max_pending_frames.max(1),
            ..Self::default()
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING,
            backpressure_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Handle for queueing frames on one connection.
///
/// Cheaply cloneable; the registry hands clones to whichever connection is
/// pushing to this one.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Outbound>,
    backpressure: BackpressureController,
}

impl WriterHandle {
    /// Queue a frame, waiting if backpressure is active.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.backpressure.reserve().await?;

        self.tx.send(Outbound::Frame(frame)).await.map_err(|_| {
            self.backpressure.release();
            RelayError::ConnectionClosed
        })
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        self.backpressure.try_reserve()?;

        self.tx.try_send(Outbound::Frame(frame)).map_err(|e| {
            self.backpressure.release();
            match e {
                mpsc::error::TrySendError::Full(_) => RelayError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => RelayError::ConnectionClosed,
            }
        })
    }

    /// Ask the writer to flush everything queued so far and then half-close
    /// the socket.
    pub async fn close(&self) -> Result<()> {
        self.tx
            .send(Outbound::Close)
            .await
            .map_err(|_| RelayError::ConnectionClosed)
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending_count()
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// The task ends when every handle is dropped, after a close request, or on
/// the first write error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    // One spare slot so a close request never waits behind a full queue.
    let (tx, rx) = mpsc::channel(config.max_pending_frames + 1);
    let backpressure =
        BackpressureController::with_timeout(config.max_pending_frames, config.backpressure_timeout);

    let handle = WriterHandle {
        tx,
        backpressure: backpressure.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, backpressure));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Outbound>,
    mut writer: W,
    backpressure: BackpressureController,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut closing = false;

        match rx.recv().await {
            Some(Outbound::Frame(frame)) => batch.push(frame),
            Some(Outbound::Close) => closing = true,
            None => return Ok(()),
        }

        while !closing && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Outbound::Frame(frame)) => batch.push(frame),
                Ok(Outbound::Close) => closing = true,
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
        backpressure.release_many(batch.len());

        if closing {
            writer.shutdown().await?;
            debug!("Writer half-closed");
            return Ok(());
        }
    }
}

/// Write a batch of frames using scatter/gather I/O, resuming after partial
/// writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice list for everything past the first `skip_bytes` bytes
/// of the batch.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for section in frame.sections() {
            let end = offset + section.len();
            if !section.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&section[start..]));
            }
            offset = end;
        }
    }

    slices
}
