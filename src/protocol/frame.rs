//! Receive-side framing.
//!
//! Bytes arrive in arbitrary chunks. `FrameBuffer` accumulates them and
//! reports completion once a terminator line has arrived and the text up to
//! it declares a `DATA_LENGTH` equal to the received `DATA` value.
//! Terminator candidates are found incrementally: only a short window before
//! the new bytes is rescanned, and the text is only decoded when a candidate
//! shows up.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use super::{decode, FrameError, Metadata, KEY_CHECKSUM, TERMINATOR};

/// Default cap on a single in-progress frame (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default read size per socket read.
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Byte accumulator for one connection.
///
/// Holds at most one in-progress frame. A read that carries the end of one
/// frame and the start of the next leaves that start behind after
/// [`FrameBuffer::extract`].
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    limit: usize,
    /// End offset of the first complete frame, if any.
    complete_end: Option<usize>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            complete_end: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append raw bytes.
    ///
    /// Fails once the buffered frame would exceed the configured limit.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if self.buf.len() + bytes.len() > self.limit {
            return Err(FrameError::TooLarge { limit: self.limit });
        }
        let old_len = self.buf.len();
        self.buf.extend_from_slice(bytes);
        if self.complete_end.is_none() {
            // Rescan candidates whose trailing context was still undecided.
            self.scan_from((old_len + 1).saturating_sub(TERMINATOR.len() + KEY_CHECKSUM.len()));
        }
        Ok(())
    }

    /// Whether a full frame is buffered.
    pub fn is_complete(&self) -> bool {
        self.complete_end.is_some()
    }

    /// Take the first complete frame out of the buffer.
    ///
    /// Returns `None` while the frame is still incomplete.
    pub fn extract(&mut self) -> Option<Metadata> {
        let end = self.complete_end.take()?;
        let frame: Vec<u8> = self.buf.drain(..end).collect();
        if self.buf.first() == Some(&b'\n') {
            self.buf.remove(0);
        }
        if !self.buf.is_empty() {
            trace!(carried = self.buf.len(), "Carrying bytes into next frame");
            self.scan_from(0);
        }
        Some(decode(&String::from_utf8_lossy(&frame)))
    }

    fn scan_from(&mut self, start: usize) {
        let needle = TERMINATOR.as_bytes();
        if self.buf.len() < needle.len() {
            return;
        }
        let last = self.buf.len() - needle.len();
        let mut pos = start;
        while pos <= last {
            let at_line_start = pos == 0 || self.buf[pos - 1] == b'\n';
            if at_line_start
                && &self.buf[pos..pos + needle.len()] == needle
                && self.ends_line(pos + needle.len())
            {
                let end = pos + needle.len();
                let text = String::from_utf8_lossy(&self.buf[..end]);
                if decode(&text).length_matches() {
                    self.complete_end = Some(end);
                    return;
                }
                trace!(offset = pos, "Terminator with mismatched length, still buffering");
            }
            pos += 1;
        }
    }

    /// Whether a terminator ending at `end` stands on its own line.
    ///
    /// Accepts end of buffer, a newline, or the first key of a frame sent
    /// back to back. A partial first key is left for the next push.
    fn ends_line(&self, end: usize) -> bool {
        let rest = &self.buf[end..];
        rest.is_empty() || rest[0] == b'\n' || rest.starts_with(KEY_CHECKSUM.as_bytes())
    }
}

/// Pulls whole frames out of a byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, chunk_size: usize, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_limit(max_frame_bytes),
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Read until the next frame completes.
    ///
    /// Returns `Ok(None)` when the peer closes the stream.
    pub async fn next_frame(&mut self) -> Result<Option<Metadata>, FrameError> {
        loop {
            if let Some(metadata) = self.buffer.extract() {
                return Ok(Some(metadata));
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    debug!(pending = self.buffer.len(), "Stream closed mid-frame");
                }
                return Ok(None);
            }
            self.buffer.push(&self.chunk[..n])?;
        }
    }
}
