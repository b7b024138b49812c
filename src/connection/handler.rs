//! Connection Worker
//!
//! Each accepted client is served by one [`ConnectionWorker`] running in its
//! own task. The worker reads a request, routes it, runs the handler, sends
//! the response, and (with keep-alive) drains the unread body and goes
//! around again.
//!
//! ## Request Lifecycle
//!
//! ```text
//!        ┌───────────────────────────────────────────────┐
//!        │                                               │
//!        ▼                                               │
//!   ReadingRequestLine ──> ReadingHeaders ──> Routing    │
//!                                               │        │
//!                                               ▼        │
//!                                           Invoking     │
//!                                          /        \    │
//!                                   Ok(resp)    Err / panic
//!                                       │             │  │
//!                                       ▼             ▼  │
//!                                   Sending     Recovering (500)
//!                                       │             │
//!                          keep-alive?  │             ▼
//!                      no ──────────────┤          Closed
//!                                       ▼
//!                                   Draining ────────────┘
//! ```
//!
//! The worker takes the [`Connection`] back from the [`Request`] after every
//! exchange, so a connection is owned by exactly one request at a time.

use crate::connection::recovery::{self, ErrorPage, Failure};
use crate::connection::stream::Connection;
use crate::http::{Request, Response};
use crate::protocol::{HeadParser, ParseError};
use crate::routing::{Handler, Router};
use crate::transfer::{self, ChunkedError};
use futures_util::FutureExt;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests answered (including error responses)
    pub requests_handled: AtomicU64,
    /// Handler errors and panics turned into 500s
    pub failures_recovered: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_handled(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_recovered(&self) {
        self.failures_recovered.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts a connection as active until dropped, even if its task unwinds.
struct ActiveConnection(Arc<ConnectionStats>);

impl ActiveConnection {
    fn open(stats: &Arc<ConnectionStats>) -> Self {
        stats.connection_opened();
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

/// Per-connection behavior switches.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Put error messages and stack traces in 500 pages
    pub debug: bool,
    /// Log one line per request
    pub console_log: bool,
    /// Serve more than one request per connection
    pub keep_alive: bool,
    /// Deadline for each read while keep-alive is on
    pub keep_alive_timeout: Duration,
}

impl ConnectionSettings {
    /// Read deadline to give new connections.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.keep_alive.then_some(self.keep_alive_timeout)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            debug: false,
            console_log: true,
            keep_alive: true,
            keep_alive_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything a worker shares with the rest of the server.
pub struct ServeContext {
    pub router: Router,
    pub settings: ConnectionSettings,
    pub stats: Arc<ConnectionStats>,
    /// Answers paths no route matches; the built-in 404 page when `None`
    pub not_found: Option<Arc<dyn Handler>>,
    /// Builds the 500 page; the built-in page when `None`
    pub error_page: Option<ErrorPage>,
}

impl ServeContext {
    pub fn new(router: Router, settings: ConnectionSettings) -> Self {
        Self {
            router,
            settings,
            stats: Arc::new(ConnectionStats::new()),
            not_found: None,
            error_page: None,
        }
    }

    /// The response for a failed handler.
    ///
    /// A panicking error page falls back to the built-in one.
    fn error_response(&self, failure: &Failure) -> Response {
        let debug = self.settings.debug;
        let Some(page) = &self.error_page else {
            return recovery::error_response(failure, debug);
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| (**page)(failure, debug))) {
            Ok(response) => response,
            Err(payload) => {
                let nested = Failure::from_panic(payload);
                error!(error = %nested.message, "Error page panicked");
                recovery::error_response(failure, debug)
            }
        }
    }
}

/// Where a worker is in the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadingRequestLine,
    ReadingHeaders,
    Routing,
    Invoking,
    Sending,
    Draining,
    Recovering,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ReadingRequestLine => "reading request line",
            Phase::ReadingHeaders => "reading headers",
            Phase::Routing => "routing",
            Phase::Invoking => "invoking handler",
            Phase::Sending => "sending response",
            Phase::Draining => "draining body",
            Phase::Recovering => "recovering",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What to do after one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    Close,
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request head broke the grammar
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A chunked transfer could not be completed
    #[error("Chunked transfer aborted: {0}")]
    Chunked(#[from] ChunkedError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Keep-alive deadline elapsed with no new request
    #[error("Idle timeout")]
    IdleTimeout,

    /// Unexpected end of stream (partial request head)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

impl ConnectionError {
    /// True for the ways a connection normally ends.
    pub fn is_benign(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected | ConnectionError::IdleTimeout => true,
            ConnectionError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Serves every request on one connection.
pub struct ConnectionWorker {
    ctx: Arc<ServeContext>,
    peer: SocketAddr,
    phase: Phase,
    _active: ActiveConnection,
}

impl ConnectionWorker {
    /// Creates a worker for a newly accepted connection.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Router, settings and stats shared by all workers
    /// * `peer` - The client's socket address
    pub fn new(ctx: Arc<ServeContext>, peer: SocketAddr) -> Self {
        let active = ActiveConnection::open(&ctx.stats);
        Self {
            ctx,
            peer,
            phase: Phase::ReadingRequestLine,
            _active: active,
        }
    }

    /// Runs the request loop until the connection closes.
    pub async fn run(mut self, conn: Connection) -> Result<(), ConnectionError> {
        debug!(client = %self.peer, "Client connected");

        let result = self.main_loop(conn).await;
        let phase = self.phase;
        self.phase = Phase::Closed;

        match &result {
            Ok(()) => debug!(client = %self.peer, "Connection closed"),
            Err(e) if e.is_benign() => debug!(client = %self.peer, reason = %e, "Connection ended"),
            Err(e) => warn!(client = %self.peer, %phase, error = %e, "Connection error"),
        }
        result
    }

    async fn main_loop(&mut self, mut conn: Connection) -> Result<(), ConnectionError> {
        loop {
            self.phase = Phase::ReadingRequestLine;
            let mut parser = HeadParser::new();
            let read = conn.read_head_with(&mut parser).await;
            if read.is_ok() || parser.in_headers() {
                self.phase = Phase::ReadingHeaders;
            }
            let head = read?;
            let body_len = head.content_length()?;
            trace!(client = %self.peer, request = %head, body_len, "Parsed request head");

            let mut request = Request::new(head, conn, body_len);
            let next = self.exchange(&mut request).await?;
            self.ctx.stats.request_handled();

            conn = request.into_connection();
            if next == Next::Close {
                let _ = conn.shutdown().await;
                return Ok(());
            }
        }
    }

    /// Routing through draining for one request.
    async fn exchange(&mut self, request: &mut Request) -> Result<Next, ConnectionError> {
        let ctx = Arc::clone(&self.ctx);
        let keep_alive = ctx.settings.keep_alive && !request.wants_close();

        self.phase = Phase::Routing;
        let handler = ctx.router.resolve(request.path()).or(ctx.not_found.as_ref());
        let mut response = match handler {
            None => Response::not_found(),
            Some(handler) => {
                self.phase = Phase::Invoking;
                let outcome = AssertUnwindSafe(handler.call(request)).catch_unwind().await;
                match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => return self.recover(request, Failure::from_error(&err)).await,
                    Err(panic) => return self.recover(request, Failure::from_panic(panic)).await,
                }
            }
        };

        self.phase = Phase::Sending;
        transfer::send(request, &mut response, keep_alive).await?;
        self.log_access(request, &response);
        if !keep_alive {
            return Ok(Next::Close);
        }

        self.phase = Phase::Draining;
        let drained = request.drain().await?;
        if drained > 0 {
            trace!(client = %self.peer, bytes = drained, "Drained unread body");
        }
        Ok(Next::KeepAlive)
    }

    /// Answers a failed handler with a 500 and ends the connection.
    async fn recover(&mut self, request: &mut Request, failure: Failure) -> Result<Next, ConnectionError> {
        self.phase = Phase::Recovering;
        self.ctx.stats.failure_recovered();
        error!(
            client = %self.peer,
            method = request.method(),
            path = request.path(),
            error = %failure.message,
            "Handler failed"
        );
        if let Some(trace) = &failure.trace {
            debug!(client = %self.peer, "Handler failure trace:\n{trace}");
        }

        let mut response = self.ctx.error_response(&failure);
        transfer::send(request, &mut response, false).await?;
        self.log_access(request, &response);
        Ok(Next::Close)
    }

    fn log_access(&self, request: &Request, response: &Response) {
        if self.ctx.settings.console_log {
            info!(
                client = %self.peer,
                "{} {} {} {}",
                request.method(),
                request.path(),
                response.status(),
                response.reason()
            );
        }
    }
}

/// Serves a connection to completion.
///
/// This is a convenience function that creates a [`ConnectionWorker`]
/// and runs it, swallowing the error after it has been logged.
///
/// # Arguments
///
/// * `conn` - The (possibly TLS) connection
/// * `ctx` - Shared serving context
pub async fn handle_connection(conn: Connection, ctx: Arc<ServeContext>) {
    let peer = conn.peer_addr();
    let worker = ConnectionWorker::new(ctx, peer);
    let _ = worker.run(conn).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::HandlerFuture;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn hello(_req: &mut Request) -> HandlerFuture<'_> {
        Box::pin(async { Ok(Response::ok().with_body("hello")) })
    }

    fn echo_len(req: &mut Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            let body = req.read_body_to_end(1 << 20).await?;
            Ok(Response::ok().with_body(body.len().to_string()))
        })
    }

    fn ignore_body(_req: &mut Request) -> HandlerFuture<'_> {
        Box::pin(async { Ok(Response::ok().with_body("ignored")) })
    }

    fn explode(req: &mut Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            if req.path().starts_with("/explode") {
                panic!("database password is hunter2");
            }
            Ok(Response::ok())
        })
    }

    fn fail(_req: &mut Request) -> HandlerFuture<'_> {
        Box::pin(async { Err(anyhow::anyhow!("backend unavailable")) })
    }

    fn missing_page(req: &mut Request) -> HandlerFuture<'_> {
        Box::pin(async move { Ok(Response::new(404).with_body(format!("nothing at {}", req.path()))) })
    }

    fn oops_page(failure: &Failure, debug: bool) -> Response {
        let body = if debug {
            format!("oops: {}", failure.message)
        } else {
            "oops".to_string()
        };
        Response::new(500).with_body(body)
    }

    fn test_context(settings: ConnectionSettings) -> ServeContext {
        let mut router = Router::new();
        let routes: [(&str, Arc<dyn Handler>); 5] = [
            ("/hello", Arc::new(hello)),
            ("/echo", Arc::new(echo_len)),
            ("/ignore", Arc::new(ignore_body)),
            ("/explode", Arc::new(explode)),
            ("/fail", Arc::new(fail)),
        ];
        for (path, handler) in routes {
            router.register(path, handler);
        }
        ServeContext::new(router, settings)
    }

    async fn create_test_server(settings: ConnectionSettings) -> (SocketAddr, Arc<ConnectionStats>) {
        spawn_server(test_context(settings)).await
    }

    async fn spawn_server(ctx: ServeContext) -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = Arc::new(ctx);
        let stats = Arc::clone(&ctx.stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let conn = Connection::new(stream, client_addr, ctx.settings.read_timeout());
                tokio::spawn(handle_connection(conn, Arc::clone(&ctx)));
            }
        });

        (addr, stats)
    }

    fn quiet() -> ConnectionSettings {
        ConnectionSettings {
            console_log: false,
            ..ConnectionSettings::default()
        }
    }

    /// Reads one response with a Content-Length body.
    async fn read_response(client: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            raw.push(byte[0]);
        }
        let head = String::from_utf8(raw).unwrap();
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        let mut body = vec![0u8; len];
        client.read_exact(&mut body).await.unwrap();
        head + &String::from_utf8_lossy(&body)
    }

    #[tokio::test]
    async fn test_simple_request() {
        let (addr, _) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();

        let reply = read_response(&mut client).await;
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_and_keeps_alive() {
        let (addr, _) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"GET /nowhere HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(read_response(&mut client).await.starts_with("HTTP/1.1 404 Not Found"));

        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(read_response(&mut client).await.ends_with("hello"));
    }

    #[tokio::test]
    async fn test_keep_alive_drains_unread_body() {
        let (addr, _) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"POST /ignore HTTP/1.1\r\nContent-Length: 11\r\n\r\nGET /x HTTP")
            .await
            .unwrap();
        assert!(read_response(&mut client).await.ends_with("ignored"));

        client
            .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd")
            .await
            .unwrap();
        assert!(read_response(&mut client).await.ends_with("\r\n\r\n4"));
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let (addr, stats) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\n\r\nPOST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyzGET /hello HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        assert!(read_response(&mut client).await.ends_with("hello"));
        assert!(read_response(&mut client).await.ends_with("\r\n\r\n3"));
        assert!(read_response(&mut client).await.ends_with("hello"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stats.requests_handled.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_client_connection_close() {
        let (addr, _) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut all = Vec::new();
        client.read_to_end(&mut all).await.unwrap();
        let reply = String::from_utf8(all).unwrap();
        assert!(reply.contains("Connection: close\r\n"));
        assert!(reply.ends_with("hello"));
    }

    #[tokio::test]
    async fn test_keep_alive_disabled() {
        let settings = ConnectionSettings {
            keep_alive: false,
            ..quiet()
        };
        let (addr, _) = create_test_server(settings).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut all = Vec::new();
        client.read_to_end(&mut all).await.unwrap();
        let reply = String::from_utf8(all).unwrap();
        assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 1);
    }

    #[tokio::test]
    async fn test_panic_yields_single_generic_500() {
        let (addr, stats) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /explode HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut all = Vec::new();
        client.read_to_end(&mut all).await.unwrap();
        let reply = String::from_utf8(all).unwrap();
        assert_eq!(reply.matches("HTTP/1.1 500 Internal Server Error").count(), 1);
        assert!(!reply.contains("hunter2"));
        assert!(!reply.contains("hello"));
        assert_eq!(stats.failures_recovered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_debug_mode_shows_error() {
        let settings = ConnectionSettings {
            debug: true,
            ..quiet()
        };
        let (addr, _) = create_test_server(settings).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /fail HTTP/1.1\r\n\r\n").await.unwrap();

        let mut all = Vec::new();
        client.read_to_end(&mut all).await.unwrap();
        let reply = String::from_utf8(all).unwrap();
        assert!(reply.starts_with("HTTP/1.1 500 "));
        assert!(reply.contains("<p>backend unavailable</p>"));
    }

    #[tokio::test]
    async fn test_invalid_content_length_closes_without_response() {
        let (addr, _) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: ten\r\n\r\n")
            .await
            .unwrap();

        let mut all = Vec::new();
        client.read_to_end(&mut all).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_request_line_closes() {
        let (addr, _) = create_test_server(quiet()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut line = b"GET /".to_vec();
        line.extend(std::iter::repeat(b'a').take(4096));
        line.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let _ = client.write_all(&line).await;

        let mut all = Vec::new();
        let _ = client.read_to_end(&mut all).await;
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server(quiet()).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        read_response(&mut client).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_custom_not_found_handler() {
        let mut ctx = test_context(quiet());
        ctx.not_found = Some(Arc::new(missing_page));
        let (addr, _) = spawn_server(ctx).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"GET /nowhere/deep HTTP/1.1\r\n\r\n").await.unwrap();
        let reply = read_response(&mut client).await;
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(reply.ends_with("nothing at /nowhere/deep"));

        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(read_response(&mut client).await.ends_with("hello"));
    }

    async fn fetch_closing(ctx: ServeContext, target: &str) -> String {
        let (addr, _) = spawn_server(ctx).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("GET {target} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut all = Vec::new();
        client.read_to_end(&mut all).await.unwrap();
        String::from_utf8(all).unwrap()
    }

    #[tokio::test]
    async fn test_custom_error_page() {
        let mut ctx = test_context(quiet());
        ctx.error_page = Some(Arc::new(oops_page));
        let reply = fetch_closing(ctx, "/fail").await;
        assert!(reply.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(reply.contains("Connection: close\r\n"));
        assert!(reply.ends_with("\r\n\r\noops"));

        let mut ctx = test_context(ConnectionSettings {
            debug: true,
            ..quiet()
        });
        ctx.error_page = Some(Arc::new(oops_page));
        let reply = fetch_closing(ctx, "/explode").await;
        assert!(reply.ends_with("oops: database password is hunter2"));
    }

    #[tokio::test]
    async fn test_panicking_error_page_falls_back() {
        let mut ctx = test_context(quiet());
        ctx.error_page = Some(Arc::new(|_: &Failure, _: bool| -> Response { panic!("page broke") }));
        let reply = fetch_closing(ctx, "/fail").await;
        assert!(reply.starts_with("HTTP/1.1 500 "));
        assert!(!reply.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_oversized_header_fails_while_reading_headers() {
        let ctx = Arc::new(test_context(quiet()));
        let mut worker = ConnectionWorker::new(ctx, "127.0.0.1:40000".parse().unwrap());
        let (mut client, server) = duplex(8192);
        let mut request = b"GET /hello HTTP/1.1\r\nX-Big: ".to_vec();
        request.extend(std::iter::repeat(b'v').take(2000));
        client.write_all(&request).await.unwrap();

        let conn = Connection::new(server, "127.0.0.1:40000".parse().unwrap(), None);
        let result = worker.main_loop(conn).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Parse(ParseError::BufferTooBig { .. }))
        ));
        assert_eq!(worker.phase, Phase::ReadingHeaders);
    }

    #[tokio::test]
    async fn test_oversized_request_line_fails_while_reading_line() {
        let ctx = Arc::new(test_context(quiet()));
        let mut worker = ConnectionWorker::new(ctx, "127.0.0.1:40000".parse().unwrap());
        let (mut client, server) = duplex(8192);
        let mut request = b"GET /".to_vec();
        request.extend(std::iter::repeat(b'a').take(2000));
        client.write_all(&request).await.unwrap();

        let conn = Connection::new(server, "127.0.0.1:40000".parse().unwrap(), None);
        assert!(worker.main_loop(conn).await.is_err());
        assert_eq!(worker.phase, Phase::ReadingRequestLine);
    }

    #[tokio::test]
    async fn test_active_count_released_when_worker_task_panics() {
        let ctx = Arc::new(test_context(quiet()));
        let task_ctx = Arc::clone(&ctx);
        let result = tokio::spawn(async move {
            let _worker = ConnectionWorker::new(task_ctx, "127.0.0.1:40000".parse().unwrap());
            panic!("send path failed");
        })
        .await;

        assert!(result.unwrap_err().is_panic());
        assert_eq!(ctx.stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_benign_errors() {
        assert!(ConnectionError::ClientDisconnected.is_benign());
        assert!(ConnectionError::IdleTimeout.is_benign());
        assert!(!ConnectionError::UnexpectedEof.is_benign());
        assert!(!ConnectionError::Parse(ParseError::BufferTooBig { max: 1 }).is_benign());
    }
}
