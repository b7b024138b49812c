//! Connection Handling
//!
//! Each accepted client is served by its own async task. The task owns a
//! [`Connection`] and loops over requests until the client leaves, the
//! keep-alive deadline passes, or a handler fails.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Accept loops (server::Server)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() [+ TLS handshake]
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionWorker                           │
//! │                                                             │
//! │  ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌──────────┐ │
//! │  │ Read head │──>│  Route  │──>│ Handler  │──>│   Send   │ │
//! │  └───────────┘   └─────────┘   └────┬─────┘   └────┬─────┘ │
//! │        ▲                            │ panic/Err    │       │
//! │        │                            ▼              │       │
//! │        │                      ┌──────────┐         │       │
//! │        │                      │ 500+close│         │       │
//! │        │                      └──────────┘         │       │
//! │        └──────────────── drain body <──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `stream`: [`Connection`], a buffered plain-or-TLS transport
//! - `handler`: The per-connection request loop and its statistics
//! - `recovery`: Turning handler errors and panics into 500 responses

pub mod handler;
pub mod recovery;
pub mod stream;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionSettings, ConnectionStats, ConnectionWorker,
    Phase, ServeContext,
};
pub use recovery::{ErrorPage, Failure};
pub use stream::{BoxedStream, Connection, Stream};
