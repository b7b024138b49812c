//! Handler failure recovery
//!
//! A handler can fail two ways: by returning `Err`, or by panicking. Both
//! are turned into a [`Failure`] and then into a 500 response. In debug mode
//! the page shows the message and a stack trace; otherwise it is the
//! generic error page and the details only go to the log.
//!
//! Panic payloads carry no backtrace, so in debug mode a panic hook records
//! one into a thread-local slot as the panic starts. The worker reads it back
//! on the same thread once `catch_unwind` returns.

use crate::http::Response;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::sync::{Arc, Once};

thread_local! {
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Installs a panic hook that captures a backtrace for the debug page.
///
/// Idempotent; the previously installed hook still runs afterwards.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded by the most recent panic on this thread.
pub fn take_trace() -> Option<String> {
    LAST_TRACE.with(|slot| slot.borrow_mut().take())
}

/// What went wrong inside a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub trace: Option<String>,
}

impl Failure {
    /// From a payload returned by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self {
            message,
            trace: take_trace(),
        }
    }

    /// From an error a handler returned.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let backtrace = error.backtrace();
        let trace = (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());
        Self {
            message: format!("{error:#}"),
            trace,
        }
    }
}

/// Application-supplied 500 page, given the failure and the debug flag.
pub type ErrorPage = Arc<dyn Fn(&Failure, bool) -> Response + Send + Sync>;

/// Escapes text for inclusion in an HTML body.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Builds the 500 response for a failure.
pub fn error_response(failure: &Failure, debug: bool) -> Response {
    let mut response = Response::internal_error();
    if !debug {
        return response;
    }

    let body = response.body_mut();
    body.clear();
    body.extend_from_slice(b"<!DOCTYPE html><html><head><title>500 Internal Server Error</title></head><body>");
    let lines = failure
        .message
        .lines()
        .chain(failure.trace.iter().flat_map(|t| t.lines()));
    for line in lines {
        body.extend_from_slice(b"<p>");
        body.extend_from_slice(escape_html(line).as_bytes());
        body.extend_from_slice(b"</p>");
    }
    body.extend_from_slice(b"</body></html>");
    response
}
