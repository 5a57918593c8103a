//! Line encoding and decoding for the jetbeep serial protocol.
//!
//! Every message in either direction is one ASCII line:
//! ```text
//! <VERB> [arg] [arg] ... \r\n
//! ```
//! There is no length prefix and no checksum.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Line terminator.
pub const LINE_END: &[u8] = b"\r\n";

/// Longest line the decoder buffers before giving up on the stream.
pub const MAX_LINE_SIZE: usize = 4096;

/// Encodes a command line: the verb and non-empty arguments, space-joined,
/// followed by `\r\n`.
#[must_use]
pub fn encode(verb: &str, args: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(verb.len() + args.len() + 3);
    buf.put_slice(verb.as_bytes());
    if !args.is_empty() {
        buf.put_u8(b' ');
        buf.put_slice(args.as_bytes());
    }
    buf.put_slice(LINE_END);
    buf.freeze()
}

/// Line decoder that handles partial reads.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// Set after an oversized line: bytes are dropped up to the next
    /// terminator.
    discarding: bool,
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            discarding: false,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete line, without its terminator.
    ///
    /// Returns `Ok(None)` if more data is needed. Empty lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if more than [`MAX_LINE_SIZE`] bytes are
    /// buffered without a terminator. The rest of that line, up to the next
    /// terminator, is dropped.
    pub fn decode(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(end) = self
                .buffer
                .windows(LINE_END.len())
                .position(|w| w == LINE_END)
            else {
                if self.discarding {
                    // keep a trailing '\r' that may start the terminator
                    let keep = usize::from(self.buffer.last() == Some(&LINE_END[0]));
                    self.buffer.advance(self.buffer.len() - keep);
                    return Ok(None);
                }
                if self.buffer.len() > MAX_LINE_SIZE {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(Error::protocol(format!(
                        "line exceeds {MAX_LINE_SIZE} bytes ({size} buffered)"
                    )));
                }
                return Ok(None);
            };

            let line = self.buffer.split_to(end).freeze();
            self.buffer.advance(LINE_END.len());
            if std::mem::take(&mut self.discarding) {
                tracing::debug!("dropped {} bytes of an oversized line", line.len());
                continue;
            }
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}
