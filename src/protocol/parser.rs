//! Byte-fed HTTP/1.1 Request Head Parser
//!
//! The parsers in this module never touch a socket. They are fed one byte at
//! a time by whoever owns the connection and report when a complete unit has
//! been recognized. This keeps them trivially testable and lets the
//! connection layer decide how bytes are buffered and how long to wait.
//!
//! ## State Machine
//!
//! ```text
//!   Method --' '--> Path --' '--> Protocol --'\r'--> ProtocolEnd --'\n'--> Headers
//!                    |                ^
//!                   '?'              ' '
//!                    v                |
//!                    +----> Query ----+
//!
//!   Headers:  Key --':'--> Separator --' '--> Value --'\r'--> ValueEnd --'\n'--> Key
//!              |
//!            '\r' on an empty key
//!              v
//!           BlankLine --'\n'--> done
//! ```
//!
//! Every token goes through a [`LineReader`] capped at
//! [`MAX_LINE_SIZE`](crate::protocol::types::MAX_LINE_SIZE) bytes, so an
//! oversized method, path, query, protocol, key or value fails with
//! [`ParseError::BufferTooBig`] instead of growing without bound.
//!
//! ## Return Convention
//!
//! `feed` returns:
//! - `Ok(None)` - keep feeding
//! - `Ok(Some(unit))` - a complete unit was recognized
//! - `Err(ParseError)` - the client violated the grammar; close the connection

use crate::protocol::line::LineReader;
use crate::protocol::types::RequestHead;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while parsing a request head.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A token grew past the accumulator limit
    #[error("token exceeds {max} bytes")]
    BufferTooBig { max: usize },

    /// The request line did not have the `METHOD PATH PROTOCOL` shape
    #[error("malformed request line: {0}")]
    MalformedRequestLine(&'static str),

    /// A header line was not `Key: Value`
    #[error("malformed header line: {0}")]
    MalformedHeader(&'static str),

    /// A token was not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// `Content-Length` was present but not a non-negative integer
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Key,
    Separator,
    Value,
    ValueEnd,
    BlankLine,
}

/// Parses a block of `Key: Value\r\n` lines terminated by an empty line.
///
/// Used for the request head and again for the part headers inside a
/// multipart body. Later duplicates of a key replace earlier ones.
#[derive(Debug)]
pub struct HeaderBlockParser {
    state: HeaderState,
    line: LineReader,
    key: String,
    headers: HashMap<String, String>,
}

impl HeaderBlockParser {
    pub fn new() -> Self {
        Self {
            state: HeaderState::Key,
            line: LineReader::new(),
            key: String::new(),
            headers: HashMap::new(),
        }
    }

    /// Feeds one byte.
    ///
    /// # Returns
    ///
    /// The completed header mapping once the terminating empty line is seen.
    pub fn feed(&mut self, byte: u8) -> ParseResult<Option<HashMap<String, String>>> {
        match self.state {
            HeaderState::Key => match byte {
                b':' => {
                    if self.line.is_empty() {
                        return Err(ParseError::MalformedHeader("empty header name"));
                    }
                    self.key = self.line.take()?;
                    self.state = HeaderState::Separator;
                }
                b'\r' if self.line.is_empty() => self.state = HeaderState::BlankLine,
                b'\r' | b'\n' => return Err(ParseError::MalformedHeader("missing ':'")),
                _ => self.line.push(byte)?,
            },
            HeaderState::Separator => match byte {
                b' ' => self.state = HeaderState::Value,
                b'\r' => self.state = HeaderState::ValueEnd,
                _ => {
                    self.line.push(byte)?;
                    self.state = HeaderState::Value;
                }
            },
            HeaderState::Value => match byte {
                b'\r' => self.state = HeaderState::ValueEnd,
                _ => self.line.push(byte)?,
            },
            HeaderState::ValueEnd => {
                if byte != b'\n' {
                    return Err(ParseError::MalformedHeader("expected LF after CR"));
                }
                let key = std::mem::take(&mut self.key);
                let value = self.line.take()?;
                self.headers.insert(key, value);
                self.state = HeaderState::Key;
            }
            HeaderState::BlankLine => {
                if byte != b'\n' {
                    return Err(ParseError::MalformedHeader("expected LF after CR"));
                }
                self.state = HeaderState::Key;
                return Ok(Some(std::mem::take(&mut self.headers)));
            }
        }
        Ok(None)
    }
}

impl Default for HeaderBlockParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadState {
    Method,
    Path,
    Query,
    Protocol,
    ProtocolEnd,
    Headers,
}

/// Parses a request line followed by its header block.
///
/// # Example
///
/// ```ignore
/// use rawhttp::protocol::HeadParser;
///
/// let mut parser = HeadParser::new();
/// for &b in b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\n\r\n" {
///     if let Some(head) = parser.feed(b)? {
///         assert_eq!(head.path, "/a");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct HeadParser {
    state: HeadState,
    line: LineReader,
    head: RequestHead,
    headers: HeaderBlockParser,
}

impl HeadParser {
    pub fn new() -> Self {
        Self {
            state: HeadState::Method,
            line: LineReader::new(),
            head: RequestHead::default(),
            headers: HeaderBlockParser::new(),
        }
    }

    /// Returns true if no byte of a request has been accepted yet.
    ///
    /// The connection layer uses this to tell a clean close between requests
    /// apart from a client vanishing mid-head.
    pub fn is_idle(&self) -> bool {
        self.state == HeadState::Method && self.line.is_empty()
    }

    /// Returns true once the request line is complete and headers are being read.
    pub fn in_headers(&self) -> bool {
        self.state == HeadState::Headers
    }

    /// Feeds one byte.
    pub fn feed(&mut self, byte: u8) -> ParseResult<Option<RequestHead>> {
        match self.state {
            HeadState::Method => match byte {
                // Stray CRLF before a request line is tolerated
                b'\r' | b'\n' if self.line.is_empty() => {}
                b' ' => {
                    if self.line.is_empty() {
                        return Err(ParseError::MalformedRequestLine("empty method"));
                    }
                    self.head.method = self.line.take()?;
                    self.state = HeadState::Path;
                }
                b'\r' | b'\n' => {
                    return Err(ParseError::MalformedRequestLine("line ended inside method"))
                }
                _ => self.line.push(byte)?,
            },
            HeadState::Path => match byte {
                b' ' | b'?' => {
                    if self.line.is_empty() {
                        return Err(ParseError::MalformedRequestLine("empty path"));
                    }
                    self.head.path = self.line.take()?;
                    self.state = if byte == b'?' {
                        HeadState::Query
                    } else {
                        HeadState::Protocol
                    };
                }
                b'\r' | b'\n' => {
                    return Err(ParseError::MalformedRequestLine("line ended inside path"))
                }
                _ => self.line.push(byte)?,
            },
            HeadState::Query => match byte {
                b' ' => {
                    self.head.query = self.line.take()?;
                    self.state = HeadState::Protocol;
                }
                b'\r' | b'\n' => {
                    return Err(ParseError::MalformedRequestLine("line ended inside query"))
                }
                _ => self.line.push(byte)?,
            },
            HeadState::Protocol => match byte {
                b'\r' => {
                    if self.line.is_empty() {
                        return Err(ParseError::MalformedRequestLine("empty protocol"));
                    }
                    self.head.protocol = self.line.take()?;
                    self.state = HeadState::ProtocolEnd;
                }
                b'\n' => return Err(ParseError::MalformedRequestLine("bare LF after protocol")),
                _ => self.line.push(byte)?,
            },
            HeadState::ProtocolEnd => {
                if byte != b'\n' {
                    return Err(ParseError::MalformedRequestLine("expected LF after CR"));
                }
                self.state = HeadState::Headers;
            }
            HeadState::Headers => {
                if let Some(headers) = self.headers.feed(byte)? {
                    let mut head = std::mem::take(&mut self.head);
                    head.headers = headers;
                    self.state = HeadState::Method;
                    return Ok(Some(head));
                }
            }
        }
        Ok(None)
    }
}

impl Default for HeadParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to parse a head out of a complete buffer.
///
/// # Returns
///
/// - `Ok(Some((head, consumed)))` - a head was found in the first `consumed` bytes
/// - `Ok(None)` - the buffer ended before the head did
pub fn parse_head(buf: &[u8]) -> ParseResult<Option<(RequestHead, usize)>> {
    let mut parser = HeadParser::new();
    for (i, &byte) in buf.iter().enumerate() {
        if let Some(head) = parser.feed(byte)? {
            return Ok(Some((head, i + 1)));
        }
    }
    Ok(None)
}
