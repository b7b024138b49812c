//! # rawhttp - An HTTP/1.1 Server Engine From the Socket Up
//!
//! rawhttp parses HTTP/1.1 straight off a TCP (or TLS) stream, routes each
//! request through a path trie to an application handler, and writes the
//! response back using one of three delivery strategies.
//!
//! ## Features
//!
//! - **Byte-fed Parsing**: Request line and headers parsed one byte at a time with bounded buffers
//! - **Trie Routing**: Segment trie with trailing-slash wildcard routes
//! - **Keep-Alive**: Unread bodies are drained so the next request parses cleanly
//! - **Range Requests**: Single `bytes=` ranges on file downloads
//! - **Chunked Archives**: Directories streamed as tar with `Transfer-Encoding: chunked`
//! - **Streaming Uploads**: `multipart/form-data` written to disk without buffering
//! - **Failure Isolation**: Handler errors and panics become a 500 and close the connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              rawhttp                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ Accept      │───>│ Connection  │───>│   Router    │                  │
//! │  │ loops (N)   │    │  Worker     │    │   (trie)    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            │                  ▼                         │
//! │  ┌─────────────┐           │           ┌─────────────┐                  │
//! │  │ Head parser │<──────────┤           │  Handler    │                  │
//! │  │ (byte-fed)  │           │           │ (catch_unwind)                 │
//! │  └─────────────┘           │           └──────┬──────┘                  │
//! │                            ▼                  │ Response                │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         transfer                                 │  │
//! │  │  Buffered  │  File + Range (206/416)  │  Chunked tar archive     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use rawhttp::{App, HandlerFuture, Request, Response, ServerConfig};
//!
//! fn hello(_req: &mut Request) -> HandlerFuture<'_> {
//!     Box::pin(async { Ok(Response::ok().with_body("hello")) })
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut app = App::new();
//!     app.register("/hello", hello);
//!     app.run(ServerConfig::default()).await
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Request head parser and wire constants
//! - [`routing`]: Handler trait and path trie
//! - [`http`]: Request and response types, cookies
//! - [`transfer`]: Buffered, ranged, chunked and multipart transfers
//! - [`connection`]: Per-connection request loop and failure recovery
//! - [`server`]: Configuration, TLS and accept loops

pub mod connection;
pub mod http;
pub mod protocol;
pub mod routing;
pub mod server;
pub mod transfer;

// Re-export commonly used types for convenience
pub use connection::{ConnectionError, ConnectionStats, ErrorPage, Failure};
pub use http::{BodyError, Request, Response, SetCookie};
pub use protocol::{ParseError, RequestHead};
pub use routing::{Handler, HandlerFuture, HandlerResult, Router};
pub use server::{App, Server, ServerConfig, TlsConfig};
pub use transfer::{MultipartError, RangeError};

/// The default port rawhttp listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default host rawhttp binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of rawhttp
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
