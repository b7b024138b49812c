//! Request and Response Types
//!
//! - `request`: [`Request`], bound to its connection, with lazy body access
//! - `response`: [`Response`] builder with write-once head serialization
//! - `cookie`: `Cookie` parsing and `Set-Cookie` construction

pub mod cookie;
pub mod request;
pub mod response;

pub use cookie::SetCookie;
pub use request::{BodyError, Request, MAX_FORM_BODY_SIZE};
pub use response::{Delivery, Response};
