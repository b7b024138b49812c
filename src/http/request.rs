//! Incoming request
//!
//! A [`Request`] owns the connection while a handler runs. Body bytes are
//! pulled lazily: nothing beyond the head is read until the handler asks
//! for it, and whatever the handler leaves unread is drained by the worker
//! before the next request on a keep-alive connection.
//!
//! ```text
//!   body_len ──────────────────────────────────────────────┐
//!   |<── body_read (taken off the socket) ──>|             |
//!   |              |<── rest (read ahead) ──>|  unread     |
//!   |  consumed    |   served before socket  |  on socket  |
//! ```

use crate::connection::Connection;
use crate::http::cookie;
use crate::protocol::{find_header, header, RequestHead};
use crate::transfer::multipart::{self, MultipartError};
use bytes::{Buf, Bytes, BytesMut};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest urlencoded form body [`Request::read_form`] will accept.
pub const MAX_FORM_BODY_SIZE: u64 = 16 * 1024;

/// Errors raised by the body helpers.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The request does not have the method or content type the helper needs
    #[error("request does not satisfy the helper's requirements: {0}")]
    RequirementNotSatisfied(&'static str),

    /// The declared body is larger than the helper allows
    #[error("body of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    /// The body is not valid UTF-8
    #[error("body is not valid UTF-8")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A parsed request plus the connection it arrived on.
pub struct Request {
    method: String,
    path: String,
    query: String,
    protocol: String,
    headers: HashMap<String, String>,
    conn: Connection,
    body_len: u64,
    body_read: u64,
    rest: BytesMut,
}

impl Request {
    /// Binds a parsed head to its connection.
    ///
    /// `body_len` is the already-validated `Content-Length`.
    pub fn new(head: RequestHead, conn: Connection, body_len: u64) -> Self {
        Self {
            method: head.method,
            path: head.path,
            query: head.query,
            protocol: head.protocol,
            headers: head.headers,
            conn,
            body_len,
            body_read: 0,
            rest: BytesMut::new(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Looks up a header, falling back to a case-insensitive match.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Declared body length in bytes.
    pub fn content_length(&self) -> u64 {
        self.body_len
    }

    /// Bytes taken off the socket so far (including read-ahead still in `rest`).
    pub fn body_consumed(&self) -> u64 {
        self.body_read
    }

    /// Body bytes still available to the handler.
    pub fn body_remaining(&self) -> u64 {
        self.body_len - self.body_read + self.rest.len() as u64
    }

    /// Returns true if the client sent `Connection: close`.
    pub fn wants_close(&self) -> bool {
        self.header(header::CONNECTION)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
    }

    /// Query parameters, percent-decoded.
    ///
    /// Pairs without exactly one `=` are skipped.
    pub fn query_params(&self) -> HashMap<String, String> {
        decode_pairs(&self.query, false)
    }

    /// Cookies sent in the `Cookie` header, values percent-decoded.
    pub fn cookies(&self) -> HashMap<String, String> {
        self.header(header::COOKIE)
            .map(cookie::parse_cookie_header)
            .unwrap_or_default()
    }

    /// Returns a single cookie value.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }

    /// Reads body bytes into `buf`.
    ///
    /// Read-ahead bytes are served first, then the socket, never past the
    /// declared length. Returns 0 once the body is exhausted.
    pub async fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.rest.is_empty() {
            let n = buf.len().min(self.rest.len());
            buf[..n].copy_from_slice(&self.rest[..n]);
            self.rest.advance(n);
            return Ok(n);
        }
        let remaining = self.body_len - self.body_read;
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.conn.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside request body",
            ));
        }
        self.body_read += n as u64;
        Ok(n)
    }

    /// Reads one body byte, `None` at the end of the body.
    pub async fn read_body_byte(&mut self) -> io::Result<Option<u8>> {
        if !self.rest.is_empty() {
            return Ok(Some(self.rest.get_u8()));
        }
        if self.body_read >= self.body_len {
            return Ok(None);
        }
        let byte = self.conn.read_byte().await?;
        self.body_read += 1;
        Ok(Some(byte))
    }

    /// Fills `buf` completely from the body.
    pub async fn read_body_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_body(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "request body ended early",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Reads the rest of the body into memory.
    ///
    /// # Errors
    ///
    /// [`BodyError::TooLarge`] if more than `limit` bytes remain; nothing is read.
    pub async fn read_body_to_end(&mut self, limit: u64) -> Result<Bytes, BodyError> {
        let size = self.body_remaining();
        if size > limit {
            return Err(BodyError::TooLarge { size, limit });
        }
        let mut body = vec![0u8; size as usize];
        self.read_body_exact(&mut body).await?;
        Ok(Bytes::from(body))
    }

    /// Decodes an `application/x-www-form-urlencoded` POST body.
    ///
    /// `+` is read as a space before percent-decoding.
    pub async fn read_form(&mut self) -> Result<HashMap<String, String>, BodyError> {
        if !self.method.eq_ignore_ascii_case("POST") {
            return Err(BodyError::RequirementNotSatisfied("form bodies require POST"));
        }
        let is_form = self.header(header::CONTENT_TYPE).is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        });
        if !is_form {
            return Err(BodyError::RequirementNotSatisfied(
                "content type is not application/x-www-form-urlencoded",
            ));
        }
        let body = self.read_body_to_end(MAX_FORM_BODY_SIZE).await?;
        let text = std::str::from_utf8(&body).map_err(|_| BodyError::InvalidUtf8)?;
        Ok(decode_pairs(text, true))
    }

    /// Stores the first part of a `multipart/form-data` POST body as a file.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory the file is created in
    /// * `name` - File name to use instead of the one the client supplied
    /// * `max_size` - Upper bound on the stored size, `None` for unlimited
    ///
    /// # Returns
    ///
    /// The path of the stored file.
    pub async fn receive_file(
        &mut self,
        dir: impl AsRef<Path>,
        name: Option<&str>,
        max_size: Option<u64>,
    ) -> Result<PathBuf, MultipartError> {
        multipart::receive_file(self, dir.as_ref(), name, max_size).await
    }

    /// Pushes bytes back in front of the unread body.
    pub(crate) fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut merged = BytesMut::with_capacity(bytes.len() + self.rest.len());
        merged.extend_from_slice(bytes);
        merged.extend_from_slice(&self.rest);
        self.rest = merged;
    }

    /// Discards whatever body the handler did not consume.
    pub(crate) async fn drain(&mut self) -> io::Result<u64> {
        self.rest.clear();
        let mut scratch = [0u8; 4096];
        let mut drained = 0;
        while self.body_read < self.body_len {
            drained += self.read_body(&mut scratch).await? as u64;
        }
        Ok(drained)
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Gives the connection back to the worker.
    pub(crate) fn into_connection(self) -> Connection {
        self.conn
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("protocol", &self.protocol)
            .field("peer", &self.conn.peer_addr())
            .field("body_len", &self.body_len)
            .field("body_read", &self.body_read)
            .finish()
    }
}

fn unescape(raw: &str, plus_as_space: bool) -> String {
    let raw: Cow<'_, str> = if plus_as_space {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.into_owned(),
    }
}

/// Splits `a=1&b=2` into a map, decoding both sides.
pub(crate) fn decode_pairs(input: &str, plus_as_space: bool) -> HashMap<String, String> {
    input
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.split('=');
            let (key, value) = (parts.next()?, parts.next()?);
            if parts.next().is_some() {
                return None;
            }
            Some((unescape(key, plus_as_space), unescape(value, plus_as_space)))
        })
        .collect()
}
