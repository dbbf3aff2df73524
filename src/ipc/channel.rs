//! Framed duplex channel over an arbitrary byte stream.
//!
//! A stream is split into two halves:
//!
//! - a [`FrameReader`] owned by the connection's read loop, yielding one
//!   payload per frame and `None` once the peer has closed;
//! - a single writer task (see [`run_writer`]) that owns the write half and
//!   drains a bounded queue of outbound payloads. Every producer holds a
//!   cloneable [`FrameSender`]; because only the writer task touches the
//!   stream, frames from concurrent producers can never interleave.
//!
//! Dropping every [`FrameSender`] lets the writer drain what is queued,
//! flush, shut the write half down, and exit.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::config::GlobalConfig;
use crate::ipc::codec::FrameCodec;
use crate::{AppError, Result};

/// Decode a frame payload as protocol text.
///
/// Trailing NUL padding is trimmed.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the payload is not valid UTF-8.
pub fn decode_text(frame: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(frame)
        .map_err(|err| AppError::Protocol(format!("frame is not valid utf-8: {err}")))?;
    Ok(text.trim_end_matches('\0').to_owned())
}

/// Read side of a framed channel.
#[derive(Debug)]
pub struct FrameReader<R> {
    framed: FramedRead<R, FrameCodec>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `reader`, rejecting frames longer than `max_frame_bytes`.
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            framed: FramedRead::new(reader, FrameCodec::with_max_frame_bytes(max_frame_bytes)),
        }
    }

    /// Wait for the next frame.
    ///
    /// Returns `Ok(None)` when the peer has closed: end of stream, a stream
    /// that ends inside a frame, or a zero-length frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] for an oversized frame and
    /// [`AppError::Io`] for a failed read. Both leave the stream unusable.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(frame)) if frame.is_empty() => {
                debug!("zero-length frame received, treating as close");
                Ok(None)
            }
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => Err(err),
        }
    }
}

/// Cloneable handle that queues frames for a connection's writer task.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Bytes>,
}

impl FrameSender {
    /// Queue one frame payload for delivery.
    ///
    /// Waits while the outbound queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotConnected`] if the writer task has stopped.
    pub async fn send_frame(&self, payload: Bytes) -> Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| AppError::NotConnected("channel writer has stopped".into()))
    }

    /// Queue a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotConnected`] if the writer task has stopped.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(Bytes::copy_from_slice(text.as_bytes()))
            .await
    }

    /// Queue a UTF-8 text frame without waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Ipc`] if the outbound queue is full and
    /// [`AppError::NotConnected`] if the writer task has stopped.
    pub fn try_send_text(&self, text: &str) -> Result<()> {
        self.tx
            .try_send(Bytes::copy_from_slice(text.as_bytes()))
            .map_err(|err| match err {
                TrySendError::Full(_) => AppError::Ipc("outbound queue is full".into()),
                TrySendError::Closed(_) => {
                    AppError::NotConnected("channel writer has stopped".into())
                }
            })
    }

    /// Whether the writer task is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Both halves of a framed stream plus the writer task driving the write half.
#[derive(Debug)]
pub struct FramedChannel<S> {
    /// Inbound frames.
    pub reader: FrameReader<ReadHalf<S>>,
    /// Outbound frame queue.
    pub sender: FrameSender,
    /// Writer task; resolves once every sender is dropped and the write half
    /// is shut down, or on the first write failure.
    pub writer: JoinHandle<Result<()>>,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split `stream` and start its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(stream: S, config: &GlobalConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(config.outbound_queue_depth);

        Self {
            reader: FrameReader::new(read_half, config.max_frame_bytes),
            sender: FrameSender { tx },
            writer: tokio::spawn(run_writer(write_half, rx, config.max_frame_bytes)),
        }
    }
}

/// Writer task: encodes queued payloads and writes them to the stream.
///
/// Exits when the queue is closed (all senders dropped), after flushing and
/// shutting down the write half.
///
/// # Errors
///
/// Returns [`AppError::Ipc`] if a write, flush, or shutdown fails; the queue
/// is closed at that point so producers observe [`AppError::NotConnected`].
pub async fn run_writer<W>(
    writer: WriteHalf<W>,
    mut rx: mpsc::Receiver<Bytes>,
    max_frame_bytes: usize,
) -> Result<()>
where
    W: AsyncWrite,
{
    let mut framed = FramedWrite::new(writer, FrameCodec::with_max_frame_bytes(max_frame_bytes));

    while let Some(payload) = rx.recv().await {
        // Feed everything already queued before flushing once.
        let mut batch = vec![payload];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        for payload in batch {
            if let Err(err) = framed.feed(payload).await {
                warn!(error = %err, "channel writer: write failed");
                rx.close();
                return Err(AppError::Ipc(format!("write failed: {err}")));
            }
        }

        if let Err(err) = framed.flush().await {
            warn!(error = %err, "channel writer: flush failed");
            rx.close();
            return Err(AppError::Ipc(format!("flush failed: {err}")));
        }
    }

    debug!("channel writer: queue closed, shutting down write half");
    framed
        .close()
        .await
        .map_err(|err| AppError::Ipc(format!("shutdown failed: {err}")))
}
