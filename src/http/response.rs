//! Outgoing response
//!
//! A [`Response`] is built by a handler and handed back to the worker, which
//! picks a delivery strategy and writes it out:
//!
//! ```text
//!   Delivery::Buffered                 -> head (with Content-Length) + in-memory body
//!   Delivery::Attachment { path, .. }  -> path is a file      -> ranged file stream
//!                                         path is a directory -> chunked tar stream
//! ```
//!
//! The status line and headers are written at most once per response; see
//! [`Response::write_head`].

use crate::http::cookie::SetCookie;
use crate::protocol::{header, reason_phrase, CRLF};
use bytes::{BufMut, BytesMut};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html><html><head><title>404 Not Found</title></head>\
<body><h1>404 Not Found</h1><p>The requested resource could not be found.</p></body></html>";

const INTERNAL_ERROR_PAGE: &str = "<!DOCTYPE html><html><head><title>500 Internal Server Error</title></head>\
<body><h1>500 Internal Server Error</h1><p>The server could not complete the request.</p></body></html>";

/// How the body of a response reaches the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The in-memory body, framed by `Content-Length`
    Buffered,
    /// A file (range-capable) or a directory (chunked archive) on disk,
    /// downloaded as `filename`
    Attachment { path: PathBuf, filename: String },
}

/// An HTTP response under construction.
#[derive(Debug, Clone)]
pub struct Response {
    protocol: String,
    status: u16,
    reason: Cow<'static, str>,
    headers: HashMap<String, String>,
    body: BytesMut,
    cookies: Vec<String>,
    header_sent: bool,
    delivery: Delivery,
}

impl Response {
    /// Creates a response with the given status and default headers
    /// (`Date`, `Content-Type: text/html; charset=utf-8`).
    pub fn new(status: u16) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            header::DATE.to_string(),
            httpdate::fmt_http_date(SystemTime::now()),
        );
        headers.insert(
            header::CONTENT_TYPE.to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        Self {
            protocol: "HTTP/1.1".to_string(),
            status,
            reason: Cow::Borrowed(reason_phrase(status)),
            headers,
            body: BytesMut::new(),
            cookies: Vec::new(),
            header_sent: false,
            delivery: Delivery::Buffered,
        }
    }

    /// Empty 200 response.
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// 404 with the default page.
    pub fn not_found() -> Self {
        Self::new(404).with_body(NOT_FOUND_PAGE)
    }

    /// 500 with the default page; the connection is closed after it.
    pub fn internal_error() -> Self {
        Self::new(500)
            .with_body(INTERNAL_ERROR_PAGE)
            .with_header(header::CONNECTION, "close")
    }

    /// 302 pointing at `location`.
    pub fn redirect(location: &str) -> Self {
        Self::new(302).with_header(header::LOCATION, location)
    }

    /// Loads a whole file into a buffered 200 response.
    ///
    /// A missing file yields [`Response::not_found`]; any other I/O error is
    /// returned to the caller.
    pub async fn static_file(path: impl AsRef<Path>, content_type: &str) -> io::Result<Self> {
        match tokio::fs::read(path.as_ref()).await {
            Ok(data) => Ok(Self::ok()
                .with_header(header::CONTENT_TYPE, content_type)
                .with_body(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::not_found()),
            Err(e) => Err(e),
        }
    }

    /// Streams a file or directory as a download named `filename`.
    ///
    /// The path is inspected when the response is sent: directories go out
    /// as a tar archive with `.tar` appended to the name, files honor
    /// `Range` requests.
    pub fn attachment(path: impl Into<PathBuf>, filename: &str) -> Self {
        let mut response = Self::ok().with_header(header::CONTENT_TYPE, "application/octet-stream");
        response.delivery = Delivery::Attachment {
            path: path.into(),
            filename: filename.to_string(),
        };
        response
    }

    /// Sets `Content-Disposition` so the body is saved as `filename`.
    pub fn set_download_name(&mut self, filename: &str) {
        self.set_header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename.replace('"', "\\\"")),
        );
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Changes the status; the reason phrase follows the code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
        self.reason = Cow::Borrowed(reason_phrase(status));
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.set_status(status);
        self
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        crate::protocol::find_header(&self.headers, name)
    }

    /// Sets a header, replacing any existing one whose name matches ignoring case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.insert(name.to_string(), value.into());
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()?;
        self.headers.remove(&key)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Appends to the in-memory body.
    pub fn write_body(&mut self, data: impl AsRef<[u8]>) {
        self.body.extend_from_slice(data.as_ref());
    }

    pub fn with_body(mut self, data: impl AsRef<[u8]>) -> Self {
        self.write_body(data);
        self
    }

    /// Queues a `Set-Cookie` header.
    pub fn set_cookie(&mut self, cookie: SetCookie) {
        self.cookies.push(cookie.to_string());
    }

    pub fn with_cookie(mut self, cookie: SetCookie) -> Self {
        self.set_cookie(cookie);
        self
    }

    /// Serialized `Set-Cookie` values, in the order they were added.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn is_header_sent(&self) -> bool {
        self.header_sent
    }

    /// Renders the status line, headers, cookies and the blank line.
    pub fn serialize_head(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(256);
        out.put_slice(self.protocol.as_bytes());
        out.put_slice(format!(" {} {}", self.status, self.reason).as_bytes());
        out.put_slice(CRLF);
        for (name, value) in &self.headers {
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(CRLF);
        }
        for cookie in &self.cookies {
            out.put_slice(header::SET_COOKIE.as_bytes());
            out.put_slice(b": ");
            out.put_slice(cookie.as_bytes());
            out.put_slice(CRLF);
        }
        out.put_slice(CRLF);
        out
    }

    /// Writes the head unless it has already been written.
    ///
    /// # Returns
    ///
    /// `true` if bytes were written, `false` if the head was already sent.
    pub async fn write_head<W>(&mut self, out: &mut W) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.header_sent {
            return Ok(false);
        }
        self.header_sent = true;
        let head = self.serialize_head();
        out.write_all(&head).await?;
        Ok(true)
    }
}
