//! Buffered connection wrapper
//!
//! [`Connection`] hides whether the peer is plain TCP or TLS and adds the two
//! things every reader in the engine needs: a read buffer (so byte-at-a-time
//! parsing does not cost a syscall per byte) and an optional per-read
//! deadline used while keep-alive is enabled.

use crate::connection::handler::ConnectionError;
use crate::protocol::{HeadParser, RequestHead};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

/// Any bidirectional byte stream the engine can serve over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased transport (plain TCP or a TLS session).
pub type BoxedStream = Box<dyn Stream>;

/// Runs a read under an optional deadline.
async fn with_deadline<T>(
    limit: Option<Duration>,
    read: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read deadline elapsed"))?,
        None => read.await,
    }
}

/// One accepted client connection.
pub struct Connection {
    stream: BufStream<BoxedStream>,
    peer: SocketAddr,
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Wraps a transport.
    ///
    /// # Arguments
    ///
    /// * `stream` - Plain or TLS stream
    /// * `peer` - Remote address, for logging
    /// * `read_timeout` - Deadline applied to every read, `None` to wait forever
    pub fn new<S: Stream + 'static>(stream: S, peer: SocketAddr, read_timeout: Option<Duration>) -> Self {
        Self {
            stream: BufStream::new(Box::new(stream)),
            peer,
            read_timeout,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Reads a single byte. End of stream is reported as `UnexpectedEof`.
    pub async fn read_byte(&mut self) -> io::Result<u8> {
        with_deadline(self.read_timeout, self.stream.read_u8()).await
    }

    /// Reads up to `buf.len()` bytes; returns 0 only at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_deadline(self.read_timeout, self.stream.read(buf)).await
    }

    /// Reads and parses the next request head.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::ClientDisconnected`] if the peer closed before sending a byte
    /// - [`ConnectionError::IdleTimeout`] if the deadline elapsed before a byte arrived
    /// - [`ConnectionError::UnexpectedEof`] if the peer closed mid-head
    /// - [`ConnectionError::Parse`] on a grammar violation
    pub async fn read_head(&mut self) -> Result<RequestHead, ConnectionError> {
        self.read_head_with(&mut HeadParser::new()).await
    }

    /// Like [`Connection::read_head`], but drives a caller-owned parser so
    /// the caller can see how far it got when the read fails.
    pub async fn read_head_with(&mut self, parser: &mut HeadParser) -> Result<RequestHead, ConnectionError> {
        loop {
            let byte = match self.read_byte().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(if parser.is_idle() {
                        ConnectionError::ClientDisconnected
                    } else {
                        ConnectionError::UnexpectedEof
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut && parser.is_idle() => {
                    return Err(ConnectionError::IdleTimeout);
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(head) = parser.feed(byte)? {
                return Ok(head);
            }
        }
    }

    /// Write half used by response senders.
    pub fn writer(&mut self) -> &mut BufStream<BoxedStream> {
        &mut self.stream
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    /// Flushes pending output and closes the write side.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_read_head_over_stream() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::new(server, peer(), None);
        client
            .write_all(b"GET /x?y=1 HTTP/1.1\r\nHost: a\r\n\r\nleftover")
            .await
            .unwrap();

        let head = conn.read_head().await.unwrap();
        assert_eq!(head.path, "/x");
        assert_eq!(head.query, "y=1");

        let mut rest = [0u8; 8];
        let n = conn.read(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b"leftover");
    }

    #[tokio::test]
    async fn test_head_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"GET /spl")
            .read(b"it HTTP/1.1\r\nHo")
            .read(b"st: a\r")
            .read(b"\n\r\n")
            .build();
        let mut conn = Connection::new(mock, peer(), None);
        let head = conn.read_head().await.unwrap();
        assert_eq!(head.path, "/split");
        assert_eq!(head.header("Host"), Some("a"));
    }

    #[tokio::test]
    async fn test_clean_close_between_requests() {
        let (client, server) = duplex(64);
        let mut conn = Connection::new(server, peer(), None);
        drop(client);
        assert!(matches!(
            conn.read_head().await,
            Err(ConnectionError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_close_mid_head() {
        let (mut client, server) = duplex(64);
        let mut conn = Connection::new(server, peer(), None);
        client.write_all(b"GET /par").await.unwrap();
        drop(client);
        assert!(matches!(
            conn.read_head().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_idle_deadline() {
        let (_client, server) = duplex(64);
        let mut conn = Connection::new(server, peer(), Some(Duration::from_millis(20)));
        assert!(matches!(
            conn.read_head().await,
            Err(ConnectionError::IdleTimeout)
        ));
    }

    #[tokio::test]
    async fn test_oversized_line_is_parse_error() {
        let (mut client, server) = duplex(4096);
        let mut conn = Connection::new(server, peer(), None);
        let mut line = b"GET /".to_vec();
        line.extend(std::iter::repeat(b'a').take(2000));
        client.write_all(&line).await.unwrap();
        assert!(matches!(
            conn.read_head().await,
            Err(ConnectionError::Parse(_))
        ));
    }
}
