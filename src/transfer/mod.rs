//! Response Delivery
//!
//! Picks how a finished [`Response`] reaches the wire:
//!
//! - `Buffered`: head with `Content-Length`, then the in-memory body
//! - `Attachment` on a file: [`file::send_file`], honoring `Range`
//! - `Attachment` on a directory: [`chunked::send_archive`]
//!
//! ## Modules
//!
//! - `range`: `Range` header parsing
//! - `file`: Ranged file streaming
//! - `chunked`: Chunked tar archive streaming
//! - `multipart`: Streaming `multipart/form-data` uploads

pub mod chunked;
pub mod file;
pub mod multipart;
pub mod range;

pub use chunked::ChunkedError;
pub use multipart::{BoundaryWindow, MultipartError};
pub use range::{ByteRange, RangeError};

use crate::connection::ConnectionError;
use crate::http::{Delivery, Request, Response};
use crate::protocol::header;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Writes `response` to the request's connection and flushes it.
///
/// The `Connection` header is set from `keep_alive`. HEAD requests get the
/// same head as GET would, without a body.
pub async fn send(
    request: &mut Request,
    response: &mut Response,
    keep_alive: bool,
) -> Result<(), ConnectionError> {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    response.set_header(header::CONNECTION, connection);

    let head_only = request.is_head();
    let range = request.header(header::RANGE).map(str::to_owned);
    let out = request.connection_mut().writer();

    match response.delivery().clone() {
        Delivery::Buffered => send_buffered(out, response, head_only).await?,
        Delivery::Attachment { path, filename } => {
            send_attachment(out, response, &path, &filename, range.as_deref(), head_only).await?
        }
    }

    request.connection_mut().flush().await?;
    Ok(())
}

async fn send_buffered<W>(out: &mut W, response: &mut Response, head_only: bool) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = response.body().len();
    response.set_header(header::CONTENT_LENGTH, len.to_string());
    response.write_head(out).await?;
    if !head_only && len > 0 {
        out.write_all(response.body()).await?;
    }
    Ok(())
}

async fn send_attachment<W>(
    out: &mut W,
    response: &mut Response,
    path: &Path,
    filename: &str,
    range: Option<&str>,
    head_only: bool,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let opened = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => None,
        Ok(_) => match tokio::fs::File::open(path).await {
            Ok(file) => Some(file),
            Err(e) => return send_missing(out, response, path, e, head_only).await,
        },
        Err(e) => return send_missing(out, response, path, e, head_only).await,
    };

    match opened {
        None => {
            response.set_download_name(&archive_name(filename));
            chunked::send_archive(out, response, path, head_only).await?
        }
        Some(file) => {
            response.set_download_name(filename);
            let size = file.metadata().await?.len();
            file::send_file(out, response, file, size, range, head_only).await?
        }
    }
    Ok(())
}

/// Download name for a directory sent as a tar archive.
fn archive_name(filename: &str) -> String {
    if filename.ends_with(".tar") {
        filename.to_string()
    } else {
        format!("{filename}.tar")
    }
}

/// Replaces an attachment that cannot be opened with the default 404.
async fn send_missing<W>(
    out: &mut W,
    response: &mut Response,
    path: &Path,
    error: std::io::Error,
    head_only: bool,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    debug!(path = %path.display(), error = %error, "Attachment unavailable");
    let connection = response
        .header(header::CONNECTION)
        .unwrap_or("keep-alive")
        .to_string();
    *response = Response::not_found().with_header(header::CONNECTION, connection);
    send_buffered(out, response, head_only).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    async fn request_for(raw: &str) -> (Request, DuplexStream) {
        let (mut client, server) = duplex(256 * 1024);
        client.write_all(raw.as_bytes()).await.unwrap();
        let mut conn = Connection::new(server, "127.0.0.1:7".parse().unwrap(), None);
        let head = conn.read_head().await.unwrap();
        (Request::new(head, conn, 0), client)
    }

    async fn read_reply(client: &mut DuplexStream, request: Request) -> String {
        drop(request);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn test_buffered_sets_length_and_connection() {
        let (mut req, mut client) = request_for("GET / HTTP/1.1\r\n\r\n").await;
        let mut response = Response::ok().with_body("hello");
        send(&mut req, &mut response, true).await.unwrap();

        let reply = read_reply(&mut client, req).await;
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("Content-Length: 5\r\n"));
        assert!(reply.contains("Connection: keep-alive\r\n"));
        assert!(reply.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn test_head_request_has_no_body() {
        let (mut req, mut client) = request_for("HEAD / HTTP/1.1\r\n\r\n").await;
        let mut response = Response::ok().with_body("hello");
        send(&mut req, &mut response, false).await.unwrap();

        let reply = read_reply(&mut client, req).await;
        assert!(reply.contains("Content-Length: 5\r\n"));
        assert!(reply.contains("Connection: close\r\n"));
        assert!(reply.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_missing_attachment_becomes_404() {
        let dir = tempfile::tempdir().unwrap();
        let (mut req, mut client) = request_for("GET /dl HTTP/1.1\r\n\r\n").await;
        let mut response = Response::attachment(dir.path().join("gone.bin"), "gone.bin");
        send(&mut req, &mut response, true).await.unwrap();
        assert_eq!(response.status(), 404);

        let reply = read_reply(&mut client, req).await;
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!reply.contains("Content-Disposition"));
    }

    #[tokio::test]
    async fn test_ranged_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digits.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let (mut req, mut client) =
            request_for("GET /dl HTTP/1.1\r\nRange: bytes=3-5\r\n\r\n").await;
        let mut response = Response::attachment(&path, "digits.txt");
        send(&mut req, &mut response, true).await.unwrap();

        let reply = read_reply(&mut client, req).await;
        assert!(reply.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(reply.contains("Content-Disposition: attachment; filename=\"digits.txt\"\r\n"));
        assert!(reply.contains("Content-Range: bytes 3-5/10\r\n"));
        assert!(reply.ends_with("\r\n\r\n345"));
    }

    #[tokio::test]
    async fn test_directory_attachment_named_as_tar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();

        let (mut req, mut client) = request_for("HEAD /dl HTTP/1.1\r\n\r\n").await;
        let mut response = Response::attachment(dir.path(), "bundle");
        send(&mut req, &mut response, true).await.unwrap();

        let reply = read_reply(&mut client, req).await;
        assert!(reply.contains("Content-Disposition: attachment; filename=\"bundle.tar\"\r\n"));
        assert!(reply.contains("Transfer-Encoding: chunked\r\n"));
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(archive_name("bundle"), "bundle.tar");
        assert_eq!(archive_name("bundle.tar"), "bundle.tar");
    }
}
