//! HTTP/1.1 Wire Types
//!
//! This module defines the values the parser produces and the constants the
//! rest of the engine shares when framing requests and responses.
//!
//! ## Request Head Format
//!
//! ```text
//! METHOD SP PATH[?QUERY] SP PROTOCOL CRLF
//! Key: Value CRLF
//! Key: Value CRLF
//! CRLF
//! ```
//!
//! The body (if any) follows the blank line and is never read by the head
//! parser; its length is taken from `Content-Length`.

use crate::protocol::parser::{ParseError, ParseResult};
use std::collections::HashMap;
use std::fmt;

/// The CRLF terminator used throughout HTTP/1.1 framing
pub const CRLF: &[u8] = b"\r\n";

/// Maximum number of bytes any single accumulator (method, path, query,
/// protocol, header key or header value) may hold.
pub const MAX_LINE_SIZE: usize = 1024;

/// Block size used when streaming files, archives and uploads
pub const FILE_SEND_BUFFER_SIZE: usize = 4096;

/// Header names the engine reads or writes itself
pub mod header {
    pub const ACCEPT_RANGES: &str = "Accept-Ranges";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_RANGE: &str = "Content-Range";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const COOKIE: &str = "Cookie";
    pub const DATE: &str = "Date";
    pub const LOCATION: &str = "Location";
    pub const RANGE: &str = "Range";
    pub const SET_COOKIE: &str = "Set-Cookie";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
}

/// A parsed request line plus its header block.
///
/// Header keys are stored exactly as received. Lookups through
/// [`RequestHead::header`] try an exact match first and then fall back to a
/// case-insensitive scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method token, e.g. `GET`
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Raw query string (without the leading `?`), empty if absent
    pub query: String,
    /// Protocol token, e.g. `HTTP/1.1`
    pub protocol: String,
    /// Header mapping, keys unique
    pub headers: HashMap<String, String>,
}

impl RequestHead {
    /// Returns the value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Parses the declared body length.
    ///
    /// A missing `Content-Length` means the request has no body.
    pub fn content_length(&self) -> ParseResult<u64> {
        match self.header(header::CONTENT_LENGTH) {
            None => Ok(0),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string())),
        }
    }
}

impl fmt::Display for RequestHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.query.is_empty() {
            write!(f, "{} {} {}", self.method, self.path, self.protocol)
        } else {
            write!(f, "{} {}?{} {}", self.method, self.path, self.query, self.protocol)
        }
    }
}

/// Looks up a header, exact key first, then ignoring ASCII case.
pub fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(value) = headers.get(name) {
        return Some(value);
    }
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Returns the canonical reason phrase for the status codes this engine produces.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
