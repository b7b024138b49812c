//! Bounded line accumulator
//!
//! Every token of a request head (method, path, query, protocol, header key,
//! header value) is collected one byte at a time into a [`LineReader`]. The
//! reader refuses to grow past its limit, which is what keeps a hostile client
//! from making us buffer an unbounded request line.

use crate::protocol::parser::{ParseError, ParseResult};
use crate::protocol::types::MAX_LINE_SIZE;
use bytes::BytesMut;

/// Accumulates bytes up to a fixed limit.
#[derive(Debug)]
pub struct LineReader {
    buf: BytesMut,
    limit: usize,
}

impl LineReader {
    /// Creates a reader bounded by [`MAX_LINE_SIZE`].
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_SIZE)
    }

    /// Creates a reader with a custom limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(128)),
            limit,
        }
    }

    /// Appends one byte.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::BufferTooBig`] if the accumulator is already full.
    pub fn push(&mut self, byte: u8) -> ParseResult<()> {
        if self.buf.len() >= self.limit {
            return Err(ParseError::BufferTooBig { max: self.limit });
        }
        self.buf.extend_from_slice(&[byte]);
        Ok(())
    }

    /// Returns true if nothing has been accumulated since the last take.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns the accumulated bytes as a string and resets the reader.
    pub fn take(&mut self) -> ParseResult<String> {
        let bytes = self.buf.split();
        String::from_utf8(bytes.to_vec()).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
