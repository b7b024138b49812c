//! Handler abstraction
//!
//! A handler receives exclusive access to the [`Request`] for the duration
//! of the call (so it can stream the body or accept an upload) and returns
//! the [`Response`] the engine should send. Returning an error, or
//! panicking, makes the engine answer with a 500 and close the connection.

use crate::http::{Request, Response};
use futures_util::future::BoxFuture;

/// What every handler eventually produces.
pub type HandlerResult = anyhow::Result<Response>;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture<'a> = BoxFuture<'a, HandlerResult>;

/// Application callback bound to a route.
///
/// Plain functions of the shape
/// `fn(&mut Request) -> HandlerFuture<'_>` implement this trait
/// automatically:
///
/// ```ignore
/// fn hello(_req: &mut Request) -> HandlerFuture<'_> {
///     Box::pin(async { Ok(Response::ok().with_body("hello")) })
/// }
/// app.register("/hello", hello);
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, request: &'a mut Request) -> HandlerFuture<'a>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Request) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, request: &'a mut Request) -> HandlerFuture<'a> {
        (self)(request)
    }
}
