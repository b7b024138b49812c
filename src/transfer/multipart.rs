//! Streaming `multipart/form-data` uploads
//!
//! Only the first part of the body is stored, and it goes straight to disk:
//! the body is read in blocks and pushed through a [`BoundaryWindow`], which
//! hands back every byte that cannot be the start of the closing delimiter.
//!
//! ## Body Layout
//!
//! ```text
//!   --BOUNDARY\r\n
//!   Content-Disposition: form-data; name="f"; filename="a.bin"\r\n
//!   Content-Type: application/octet-stream\r\n
//!   \r\n
//!   <file bytes ...>\r\n--BOUNDARY--\r\n
//!                   └── terminator ──┘
//! ```
//!
//! The terminator `\r\n--BOUNDARY` can straddle two reads, so the window
//! always keeps the last `len(terminator)` bytes back until more input (or
//! the terminator itself) shows up.

use crate::http::Request;
use crate::protocol::{find_header, header, HeaderBlockParser, ParseError, MAX_LINE_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Size of each body read while streaming a part to disk.
pub const UPLOAD_READ_SIZE: usize = MAX_LINE_SIZE;

#[derive(Debug, Error)]
pub enum MultipartError {
    /// Not a POST, or not `multipart/form-data` with a boundary
    #[error("request is not a multipart/form-data POST with a boundary")]
    RequirementNotSatisfied,

    /// The body does not start with the boundary or lacks part headers
    #[error("malformed multipart body: {0}")]
    MalformedBody(&'static str),

    /// No name was supplied and the part carries no filename
    #[error("part has no filename")]
    MissingFilename,

    /// The part grew past the caller's size limit
    #[error("upload exceeds {limit} bytes")]
    FileOverSize { limit: u64 },

    /// The file system accepted fewer bytes than were written
    #[error("upload could not be written completely")]
    IncompleteFile,

    /// The body ended before the closing boundary
    #[error("body ended before the closing boundary")]
    Truncated,

    #[error("part headers: {0}")]
    Header(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of feeding bytes to a [`BoundaryWindow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Bytes proven to belong to the part
    pub emit: Bytes,
    /// Whether the terminator has now been seen
    pub terminator_found: bool,
}

/// Sliding search for a terminator across arbitrarily split input.
#[derive(Debug)]
pub struct BoundaryWindow {
    terminator: Vec<u8>,
    tail: BytesMut,
    remainder: Bytes,
    found: bool,
}

impl BoundaryWindow {
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        let terminator = terminator.into();
        Self {
            tail: BytesMut::with_capacity(terminator.len() * 2),
            terminator,
            remainder: Bytes::new(),
            found: false,
        }
    }

    /// Window for the delimiter that closes a part: `\r\n--` + boundary.
    pub fn for_boundary(boundary: &str) -> Self {
        Self::new(format!("\r\n--{boundary}"))
    }

    /// Adds input and returns the bytes that are now known to precede the
    /// terminator.
    ///
    /// Once the terminator is found, everything after it is kept as the
    /// remainder and later input is appended there.
    pub fn feed(&mut self, input: &[u8]) -> Feed {
        if self.found {
            let mut remainder = BytesMut::from(&self.remainder[..]);
            remainder.extend_from_slice(input);
            self.remainder = remainder.freeze();
            return Feed {
                emit: Bytes::new(),
                terminator_found: true,
            };
        }

        self.tail.extend_from_slice(input);
        if let Some(at) = memmem::find(&self.tail, &self.terminator) {
            let emit = self.tail.split_to(at).freeze();
            self.tail.advance(self.terminator.len());
            self.remainder = self.tail.split().freeze();
            self.found = true;
            return Feed {
                emit,
                terminator_found: true,
            };
        }

        let keep = self.terminator.len().min(self.tail.len());
        let emit = self.tail.split_to(self.tail.len() - keep).freeze();
        Feed {
            emit,
            terminator_found: false,
        }
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Bytes currently held back as a possible terminator prefix.
    pub fn retained(&self) -> &[u8] {
        &self.tail
    }

    /// Takes the bytes that followed the terminator.
    pub fn take_remainder(&mut self) -> Bytes {
        std::mem::take(&mut self.remainder)
    }
}

/// Strips surrounding quotes and resolves `\x` escapes of a quoted-string.
pub fn unquote(value: &str) -> String {
    let value = value.trim();
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Extracts the boundary from a `multipart/form-data` content type.
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| p.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value))
        .filter(|b| !b.is_empty())
}

/// Pulls `filename` out of a `Content-Disposition` value.
///
/// Only the final path component of the client's name is kept.
pub fn disposition_filename(disposition: &str) -> Option<String> {
    let raw = disposition
        .split(';')
        .skip(1)
        .filter_map(|p| p.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, value)| unquote(value))?;
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    match base {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

async fn read_part_headers(request: &mut Request) -> Result<HashMap<String, String>, MultipartError> {
    let mut parser = HeaderBlockParser::new();
    loop {
        let byte = request
            .read_body_byte()
            .await?
            .ok_or(MultipartError::Truncated)?;
        if let Some(headers) = parser.feed(byte)? {
            return Ok(headers);
        }
    }
}

fn map_write_error(e: io::Error) -> MultipartError {
    if e.kind() == io::ErrorKind::WriteZero {
        MultipartError::IncompleteFile
    } else {
        MultipartError::Io(e)
    }
}

async fn stream_part(
    request: &mut Request,
    file: &mut File,
    boundary: &str,
    max_size: Option<u64>,
) -> Result<u64, MultipartError> {
    let mut window = BoundaryWindow::for_boundary(boundary);
    let mut block = vec![0u8; UPLOAD_READ_SIZE];
    let mut written = 0u64;
    loop {
        let n = request.read_body(&mut block).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                MultipartError::Truncated
            } else {
                MultipartError::Io(e)
            }
        })?;
        if n == 0 {
            return Err(MultipartError::Truncated);
        }

        let feed = window.feed(&block[..n]);
        written += feed.emit.len() as u64;
        if let Some(limit) = max_size {
            if written > limit {
                return Err(MultipartError::FileOverSize { limit });
            }
        }
        file.write_all(&feed.emit).await.map_err(map_write_error)?;

        if feed.terminator_found {
            request.unread(&window.take_remainder());
            return Ok(written);
        }
    }
}

/// Stores the first part of a multipart body under `dir`.
///
/// The file is named `name` if given, otherwise after the part's
/// `filename`. On any failure after the file was created, the partial file
/// is removed.
pub async fn receive_file(
    request: &mut Request,
    dir: &Path,
    name: Option<&str>,
    max_size: Option<u64>,
) -> Result<PathBuf, MultipartError> {
    if !request.method().eq_ignore_ascii_case("POST") {
        return Err(MultipartError::RequirementNotSatisfied);
    }
    let boundary = request
        .header(header::CONTENT_TYPE)
        .and_then(parse_boundary)
        .ok_or(MultipartError::RequirementNotSatisfied)?;

    let opening = format!("--{boundary}\r\n");
    let mut lead = vec![0u8; opening.len()];
    request.read_body_exact(&mut lead).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            MultipartError::Truncated
        } else {
            MultipartError::Io(e)
        }
    })?;
    if lead != opening.as_bytes() {
        return Err(MultipartError::MalformedBody("body does not open with the boundary"));
    }

    let part_headers = read_part_headers(request).await?;
    let filename = match name {
        Some(name) => name.to_string(),
        None => find_header(&part_headers, header::CONTENT_DISPOSITION)
            .and_then(disposition_filename)
            .ok_or(MultipartError::MissingFilename)?,
    };

    let target = dir.join(&filename);
    let mut file = File::create(&target).await?;
    let outcome = match stream_part(request, &mut file, &boundary, max_size).await {
        Ok(size) => file.flush().await.map(|_| size).map_err(map_write_error),
        Err(e) => Err(e),
    };
    drop(file);

    match outcome {
        Ok(size) => {
            debug!(path = %target.display(), size, "Stored upload");
            Ok(target)
        }
        Err(e) => {
            warn!(path = %target.display(), error = %e, "Upload failed, removing partial file");
            if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                debug!(path = %target.display(), error = %remove_err, "Could not remove partial upload");
            }
            Err(e)
        }
    }
}
