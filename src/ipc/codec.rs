//! Length-prefixed frame codec.
//!
//! Wraps [`tokio_util::codec::LengthDelimitedCodec`] configured for a 4-byte
//! little-endian unsigned length prefix followed by exactly that many payload
//! bytes. The codec itself is byte-agnostic: a zero-length frame decodes to an
//! empty payload. Interpreting an empty frame as "peer closed" is the
//! channel's job (see [`crate::ipc::channel::FrameReader`]).
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, LengthDelimitedCodecError};
use tracing::debug;

use crate::{AppError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default maximum payload length: 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Frame codec for flag channel streams.
///
/// # Decoder
///
/// Inbound frames whose length prefix exceeds the configured maximum return
/// [`AppError::Protocol`] instead of allocating. A stream that ends in the
/// middle of a frame yields `Ok(None)` from [`Decoder::decode_eof`], so a
/// short read is reported as closure rather than as an error.
///
/// # Encoder
///
/// The length prefix and payload are written into the same destination
/// buffer, so one frame always reaches the stream as one contiguous write.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec with the [`DEFAULT_MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec that rejects payloads longer than `max_frame_bytes`.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .little_endian()
            .length_field_type::<u32>()
            .max_frame_length(max_frame_bytes)
            .new_codec();
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Configured payload limit.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = AppError;

    /// Decode the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` while the prefix or payload is still incomplete.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner
            .decode(src)
            .map(|frame| frame.map(BytesMut::freeze))
            .map_err(|err| map_codec_error(&err, self.max_frame_bytes))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!(
                        remaining = src.len(),
                        "frame codec: stream ended inside a frame, discarding partial data"
                    );
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|err| map_codec_error(&err, self.max_frame_bytes))
    }
}

/// Map an error from [`LengthDelimitedCodec`] to an [`AppError`].
///
/// The inner codec reports an oversized frame as an `io::Error` wrapping
/// [`LengthDelimitedCodecError`]; everything else is a genuine I/O failure.
fn map_codec_error(err: &std::io::Error, max_frame_bytes: usize) -> AppError {
    let oversized = err
        .get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());
    if oversized {
        AppError::Protocol(format!(
            "frame too long: exceeded {max_frame_bytes} bytes"
        ))
    } else {
        AppError::Io(err.to_string())
    }
}
