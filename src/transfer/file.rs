//! Ranged file delivery
//!
//! Sends a regular file either whole (200) or as the single byte range the
//! client asked for (206). A bad range gets a bodiless 416. The body is
//! copied in [`FILE_SEND_BUFFER_SIZE`] blocks, with the final block cut to
//! whatever is left so exactly `Content-Length` bytes go out.

use crate::http::Response;
use crate::protocol::{header, FILE_SEND_BUFFER_SIZE};
use crate::transfer::range::ByteRange;
use std::io::{self, SeekFrom};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Streams `file` (of `size` bytes) as the response body.
///
/// # Arguments
///
/// * `out` - Destination, normally the connection's write half
/// * `response` - Response whose head is written first
/// * `range` - Raw `Range` header value, if the client sent one
/// * `head_only` - Write the head but no body (HEAD requests)
pub async fn send_file<W>(
    out: &mut W,
    response: &mut Response,
    mut file: File,
    size: u64,
    range: Option<&str>,
    head_only: bool,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    response.set_header(header::ACCEPT_RANGES, "bytes");

    let (start, len) = match range {
        None => (0, size),
        Some(value) => match ByteRange::parse(value, size) {
            Ok(range) => {
                response.set_status(206);
                response.set_header(header::CONTENT_RANGE, range.content_range(size));
                (range.start, range.len())
            }
            Err(e) => {
                debug!(range = value, size, error = %e, "Rejecting range");
                response.set_status(416);
                response.set_header(header::CONTENT_RANGE, format!("bytes */{size}"));
                response.set_header(header::CONTENT_LENGTH, "0");
                response.write_head(out).await?;
                return Ok(());
            }
        },
    };

    response.set_header(header::CONTENT_LENGTH, len.to_string());
    response.write_head(out).await?;
    if head_only || len == 0 {
        return Ok(());
    }

    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    copy_exact(&mut file, out, len).await
}

/// Copies exactly `len` bytes, failing if the source runs short.
pub async fn copy_exact<R, W>(src: &mut R, out: &mut W, len: u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut block = vec![0u8; FILE_SEND_BUFFER_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let take = remaining.min(FILE_SEND_BUFFER_SIZE as u64) as usize;
        src.read_exact(&mut block[..take]).await?;
        out.write_all(&block[..take]).await?;
        remaining -= take as u64;
    }
    Ok(())
}
