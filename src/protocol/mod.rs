//! HTTP/1.1 Wire Protocol
//!
//! Everything needed to turn raw request bytes into a [`RequestHead`].
//!
//! ## Modules
//!
//! - `line`: Bounded byte accumulator shared by every token
//! - `parser`: Byte-fed request line and header block state machines
//! - `types`: `RequestHead`, framing constants and status reason phrases
//!
//! ## Example
//!
//! ```ignore
//! use rawhttp::protocol::parse_head;
//!
//! let (head, consumed) = parse_head(b"GET /a HTTP/1.1\r\n\r\n").unwrap().unwrap();
//! assert_eq!(head.method, "GET");
//! ```

pub mod line;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use line::LineReader;
pub use parser::{parse_head, HeadParser, HeaderBlockParser, ParseError, ParseResult};
pub use types::{find_header, header, reason_phrase, RequestHead, CRLF, FILE_SEND_BUFFER_SIZE, MAX_LINE_SIZE};
