//! Newline-delimited JSON framing over async byte streams.
//!
//! One JSON object per line. Both peers use the same codec; only the message
//! types differ.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Maximum size of a single frame (1MB), not counting the line terminator.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A raw line read from the peer.
#[derive(Debug)]
pub enum Frame {
    Line(String),
    Eof,
}

/// Reads frames from a buffered stream.
///
/// A partially received line is kept between calls, so
/// [`next_frame`](Self::next_frame) can be raced in `tokio::select!`
/// without losing input.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read the next non-empty line.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            // One byte past the cap plus the '\n', so an oversized line is
            // detected without buffering all of it.
            let remaining = (MAX_FRAME_SIZE + 2).saturating_sub(self.buf.len()) as u64;
            let bytes_read = (&mut self.inner)
                .take(remaining)
                .read_until(b'\n', &mut self.buf)
                .await?;

            let terminated = self.buf.last() == Some(&b'\n');
            let size = self.buf.len() - usize::from(terminated);
            if size > MAX_FRAME_SIZE {
                self.buf.clear();
                return Err(Error::OutputTooLarge {
                    size,
                    max: MAX_FRAME_SIZE,
                });
            }
            if !terminated {
                if bytes_read > 0 {
                    continue;
                }
                if self.buf.is_empty() {
                    return Ok(Frame::Eof);
                }
            }

            let raw = std::mem::take(&mut self.buf);
            let line = String::from_utf8(raw).map_err(|e| {
                Error::ProtocolViolation(format!("malformed message: invalid UTF-8: {e}"))
            })?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Frame::Line(trimmed.to_string()));
            }
        }
    }
}

/// Decode a line into a message, treating any failure as a protocol violation.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line).map_err(|e| Error::ProtocolViolation(format!("malformed message: {e}")))
}

/// Serialize a message and write it as one line.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
