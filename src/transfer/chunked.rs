//! Chunked directory archives
//!
//! A directory is streamed as a tar archive whose size is not known up
//! front, so the body goes out with `Transfer-Encoding: chunked`.
//!
//! ## Producer / Consumer
//!
//! ```text
//!   spawn_blocking                       connection task
//!   ┌──────────────────────┐   bounded   ┌──────────────────────────┐
//!   │ tar::Builder         │   channel   │ recv block               │
//!   │   -> ChannelWriter   │ ──────────> │   "<HEX>\r\n" block "\r\n"│
//!   │   4096-byte blocks   │  Result<..> │ end of stream: "0\r\n\r\n"│
//!   └──────────────────────┘             └──────────────────────────┘
//! ```
//!
//! The archiver walks the file system with blocking I/O, so it runs on the
//! blocking pool and hands finished blocks to the connection task. A full
//! channel parks the archiver until the socket catches up. If the archiver
//! fails, it sends the error instead of a block; the consumer then aborts
//! without writing the terminating chunk, so the client sees a truncated
//! transfer rather than a complete-looking bad archive.

use crate::http::Response;
use crate::protocol::{header, CRLF, FILE_SEND_BUFFER_SIZE};
use bytes::{Bytes, BytesMut};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Blocks the archiver may run ahead of the socket.
pub const ARCHIVE_CHANNEL_DEPTH: usize = 8;

/// Terminating zero-length chunk.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

#[derive(Debug, Error)]
pub enum ChunkedError {
    #[error("socket write failed: {0}")]
    Socket(#[from] io::Error),

    #[error("archive producer failed: {0}")]
    Producer(io::Error),
}

/// `std::io::Write` adapter that forwards fixed-size blocks over a channel.
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    block: BytesMut,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            block: BytesMut::with_capacity(FILE_SEND_BUFFER_SIZE),
        }
    }

    fn send(&self, block: Bytes) -> io::Result<()> {
        self.tx
            .blocking_send(Ok(block))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.block.extend_from_slice(buf);
        while self.block.len() >= FILE_SEND_BUFFER_SIZE {
            let full = self.block.split_to(FILE_SEND_BUFFER_SIZE).freeze();
            self.send(full)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.block.is_empty() {
            let partial = self.block.split().freeze();
            self.send(partial)?;
        }
        Ok(())
    }
}

/// Writes `dir` as a tar archive rooted at its own name.
fn write_archive(dir: &Path, writer: ChannelWriter) -> io::Result<()> {
    let root = dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("archive"));
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(&root, dir)?;
    let mut writer = builder.into_inner()?;
    writer.flush()
}

/// Starts archiving `dir` on the blocking pool.
///
/// # Returns
///
/// The receiving end of the block channel. It yields `Ok` blocks, at most one
/// `Err` if archiving fails, and closes when the producer is done.
pub fn spawn_archiver(dir: PathBuf) -> mpsc::Receiver<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(ARCHIVE_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let failure = tx.clone();
        match write_archive(&dir, ChannelWriter::new(tx)) {
            Ok(()) => debug!(dir = %dir.display(), "Archive complete"),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(dir = %dir.display(), "Archive abandoned by consumer")
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Archive producer failed");
                let _ = failure.blocking_send(Err(e));
            }
        }
    });
    rx
}

/// Frames one chunk.
pub async fn write_chunk<W>(out: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    out.write_all(format!("{:X}\r\n", data.len()).as_bytes()).await?;
    out.write_all(data).await?;
    out.write_all(CRLF).await
}

/// Forwards every block from `blocks` as a chunk, then the terminator.
///
/// A producer error stops the stream before the terminator is written.
pub async fn stream_chunks<W>(
    out: &mut W,
    blocks: &mut mpsc::Receiver<io::Result<Bytes>>,
) -> Result<(), ChunkedError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while let Some(block) = blocks.recv().await {
        let block = block.map_err(ChunkedError::Producer)?;
        // A zero-length chunk would end the body early
        if block.is_empty() {
            continue;
        }
        write_chunk(out, &block).await?;
    }
    out.write_all(LAST_CHUNK).await?;
    Ok(())
}

/// Sends `dir` as a chunked tar archive.
pub async fn send_archive<W>(
    out: &mut W,
    response: &mut Response,
    dir: &Path,
    head_only: bool,
) -> Result<(), ChunkedError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    response.remove_header(header::CONTENT_LENGTH);
    response.set_header(header::TRANSFER_ENCODING, "chunked");
    if head_only {
        response.write_head(out).await?;
        return Ok(());
    }

    let mut blocks = spawn_archiver(dir.to_path_buf());
    response.write_head(out).await?;
    stream_chunks(out, &mut blocks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    /// Strips chunk framing, asserting it is well formed and terminated.
    fn dechunk(mut framed: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            let line_end = framed.windows(2).position(|w| w == b"\r\n").unwrap();
            let size_hex = std::str::from_utf8(&framed[..line_end]).unwrap();
            assert_eq!(size_hex, size_hex.to_uppercase());
            let size = usize::from_str_radix(size_hex, 16).unwrap();
            framed = &framed[line_end + 2..];
            if size == 0 {
                assert_eq!(framed, b"\r\n");
                return body;
            }
            body.extend_from_slice(&framed[..size]);
            assert_eq!(&framed[size..size + 2], b"\r\n");
            framed = &framed[size + 2..];
        }
    }

    #[test]
    fn test_channel_writer_blocks() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut writer = ChannelWriter::new(tx);
        writer.write_all(&vec![7u8; FILE_SEND_BUFFER_SIZE + 10]).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let first = rx.blocking_recv().unwrap().unwrap();
        let second = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(first.len(), FILE_SEND_BUFFER_SIZE);
        assert_eq!(second.len(), 10);
        assert!(rx.blocking_recv().is_none());
    }

    #[tokio::test]
    async fn test_stream_chunks_framing() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"hello world, chunked"))).await.unwrap();
        tx.send(Ok(Bytes::new())).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"!"))).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        stream_chunks(&mut out, &mut rx).await.unwrap();
        assert_eq!(out, b"14\r\nhello world, chunked\r\n1\r\n!\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_producer_error_skips_terminator() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::Other, "disk gone"))).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = stream_chunks(&mut out, &mut rx).await.unwrap_err();
        assert!(matches!(err, ChunkedError::Producer(_)));
        assert_eq!(out, b"7\r\npartial\r\n");
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bundle");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();
        let big: Vec<u8> = (0..20_000u32).map(|i| (i % 97) as u8).collect();
        std::fs::write(root.join("nested").join("big.bin"), &big).unwrap();

        let mut response = Response::attachment(&root, "bundle");
        let mut out = Vec::new();
        send_archive(&mut out, &mut response, &root, false).await.unwrap();

        let head_len = response.serialize_head().len();
        let head = String::from_utf8(out[..head_len].to_vec()).unwrap();
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));

        let tarball = dechunk(&out[head_len..]);
        let mut archive = tar::Archive::new(&tarball[..]);
        let mut found = std::collections::HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            found.insert(path, data);
        }
        assert_eq!(found["bundle/a.txt"], b"alpha");
        assert_eq!(found["bundle/nested/big.bin"], big);
    }

    #[tokio::test]
    async fn test_missing_directory_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let mut response = Response::ok();
        let mut out = Vec::new();
        let err = send_archive(&mut out, &mut response, &missing, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkedError::Producer(_)));
        assert!(!out.ends_with(LAST_CHUNK));
    }

    #[tokio::test]
    async fn test_head_only_sends_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut response = Response::ok();
        let mut out = Vec::new();
        send_archive(&mut out, &mut response, dir.path(), true).await.unwrap();
        assert_eq!(out.len(), response.serialize_head().len());
    }
}
