//! # CRSF Frame Reader
//!
//! Pulls frames off a byte stream. Bytes are buffered inside the reader, so
//! a pending [`FrameReader::decode_next`] can be dropped (timed out or
//! cancelled) without losing a partially received frame.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::decoder::decode_frame;
use super::protocol::*;
use crate::error::{ElrsLinkError, Result};
use crate::telemetry::TelemetryFrame;

/// Read buffer size, room for a few maximum-sized frames
const READ_BUFFER_CAPACITY: usize = CRSF_MAX_FRAME_SIZE * 4;

/// Outcome of scanning the buffer for one frame
enum Scan {
    /// A whole frame is buffered at the front, with this total size
    Frame(usize),
    /// Need more bytes
    Incomplete,
}

/// Buffered CRSF frame reader over any async byte stream
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Number of bytes received but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next telemetry frame from the stream.
    ///
    /// Consumes exactly one frame's worth of bytes. A frame whose checksum
    /// does not match is consumed and reported as a protocol error; it is
    /// never retried.
    ///
    /// # Errors
    ///
    /// - `Protocol` for checksum mismatches and malformed payloads
    /// - `Port` when the stream fails or reaches end of file
    ///
    /// # Cancel safety
    ///
    /// Cancel safe. Bytes already read stay in the internal buffer.
    pub async fn decode_next(&mut self) -> Result<TelemetryFrame> {
        let frame = self.next_frame().await?;
        TelemetryFrame::try_from(frame)
    }

    /// Read the next CRC-valid raw frame
    pub async fn next_frame(&mut self) -> Result<CrsfFrame> {
        loop {
            if let Scan::Frame(size) = self.scan() {
                let bytes = self.buffer.split_to(size);
                return decode_frame(&bytes);
            }

            let read = self
                .inner
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| ElrsLinkError::Port(format!("Failed to read from port: {}", e)))?;

            if read == 0 {
                return Err(ElrsLinkError::Port("Port closed".to_string()));
            }
        }
    }

    /// Drop garbage in front of the next plausible frame and report
    /// whether that frame is complete.
    fn scan(&mut self) -> Scan {
        loop {
            match self.buffer.iter().position(|b| CRSF_FRAME_ADDRESSES.contains(b)) {
                Some(start) => {
                    if start > 0 {
                        trace!(skipped = start, "Skipping bytes before frame address");
                    }
                    self.buffer.advance(start);
                }
                None => {
                    self.buffer.clear();
                    return Scan::Incomplete;
                }
            }

            let Some(&length) = self.buffer.get(1) else {
                return Scan::Incomplete;
            };

            if !(CRSF_MIN_FRAME_LENGTH..=CRSF_MAX_FRAME_LENGTH).contains(&length) {
                // Not a real frame start, resync on the next address byte
                self.buffer.advance(1);
                continue;
            }

            let size = length as usize + 2;
            return if self.buffer.len() >= size {
                Scan::Frame(size)
            } else {
                Scan::Incomplete
            };
        }
    }
}
