//! Server Assembly
//!
//! - `config`: [`ServerConfig`] and [`TlsConfig`]
//! - `tls`: PEM loading and the rustls acceptor
//! - `app`: [`App`] route registration and the [`Server`] accept loops

pub mod app;
pub mod config;
pub mod tls;

pub use app::{App, Server};
pub use config::{ServerConfig, TlsConfig};
