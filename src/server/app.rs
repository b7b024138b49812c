//! Application and listener
//!
//! [`App`] collects routes; [`App::bind`] turns it into a [`Server`] bound
//! to a socket. The server runs several accept loops over one shared
//! listener, and every accepted connection gets its own task.
//!
//! ```text
//!          ┌──────────── Arc<TcpListener> ────────────┐
//!          ▼                 ▼                         ▼
//!    accept loop 0     accept loop 1     ...     accept loop N-1
//!          │
//!          │ spawn per connection
//!          ▼
//!    [TLS handshake] -> ConnectionWorker::run
//! ```

use crate::connection::{
    handle_connection, recovery, Connection, ConnectionStats, ErrorPage, Failure, ServeContext,
};
use crate::http::Response;
use crate::routing::{Handler, Router};
use crate::server::config::ServerConfig;
use crate::server::tls;
use anyhow::Context;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A set of routes waiting to be served.
///
/// # Example
///
/// ```ignore
/// let mut app = App::new();
/// app.register("/", index).register("/static/", assets);
/// app.not_found(missing).internal_error(|failure, debug| oops(failure, debug));
/// app.run(ServerConfig::default()).await?;
/// ```
#[derive(Default)]
pub struct App {
    router: Router,
    not_found: Option<Arc<dyn Handler>>,
    error_page: Option<ErrorPage>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("router", &self.router)
            .field("custom_not_found", &self.not_found.is_some())
            .field("custom_error_page", &self.error_page.is_some())
            .finish()
    }
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `pattern`. A trailing `/` makes the route a wildcard.
    pub fn register<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.router.register(pattern, Arc::new(handler));
        debug!(pattern, "Registered route");
        self
    }

    /// Answers requests that match no route, in place of the built-in 404 page.
    pub fn not_found<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    /// Replaces the built-in 500 page.
    ///
    /// `page` receives the failure and whether debug mode is on; it decides
    /// how much of the failure to reveal. The connection is closed after the
    /// page is sent either way.
    pub fn internal_error<F>(&mut self, page: F) -> &mut Self
    where
        F: Fn(&Failure, bool) -> Response + Send + Sync + 'static,
    {
        self.error_page = Some(Arc::new(page));
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Binds the listener and loads TLS credentials.
    pub async fn bind(self, config: ServerConfig) -> anyhow::Result<Server> {
        let acceptor = config.tls.as_ref().map(tls::load_acceptor).transpose()?;
        let listener = TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("binding {}", config.bind_address()))?;
        let local_addr = listener.local_addr()?;

        if config.debug {
            recovery::install_panic_hook();
        }

        info!(
            address = %local_addr,
            scheme = config.scheme(),
            routes = self.router.len(),
            "Listening"
        );

        let mut ctx = ServeContext::new(self.router, config.connection_settings());
        ctx.not_found = self.not_found;
        ctx.error_page = self.error_page;

        Ok(Server {
            listener: Arc::new(listener),
            acceptor,
            ctx: Arc::new(ctx),
            accept_tasks: config.accept_tasks.max(1),
            local_addr,
        })
    }

    /// Binds and serves until the process stops.
    pub async fn run(self, config: ServerConfig) -> anyhow::Result<()> {
        self.bind(config).await?.run().await;
        Ok(())
    }
}

/// A bound server.
pub struct Server {
    listener: Arc<TcpListener>,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<ServeContext>,
    accept_tasks: usize,
    local_addr: SocketAddr,
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Runs the accept loops. Only returns if every loop has died.
    pub async fn run(self) {
        let mut loops = JoinSet::new();
        for id in 0..self.accept_tasks {
            loops.spawn(accept_loop(
                id,
                Arc::clone(&self.listener),
                self.acceptor.clone(),
                Arc::clone(&self.ctx),
            ));
        }
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Accept loop terminated");
            }
        }
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    id: usize,
    listener: Arc<TcpListener>,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<ServeContext>,
) {
    debug!(accept_loop = id, "Accept loop started");
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(serve_stream(stream, addr, acceptor.clone(), Arc::clone(&ctx)));
            }
            Err(e) => {
                error!(accept_loop = id, error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve_stream(
    stream: TcpStream,
    addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<ServeContext>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Could not set TCP_NODELAY");
    }
    let read_timeout = ctx.settings.read_timeout();
    let conn = match acceptor {
        None => Connection::new(stream, addr, read_timeout),
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => Connection::new(tls_stream, addr, read_timeout),
            Err(e) => {
                warn!(client = %addr, error = %e, "TLS handshake failed");
                return;
            }
        },
    };
    handle_connection(conn, ctx).await;
}
