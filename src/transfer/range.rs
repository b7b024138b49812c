//! `Range` header parsing
//!
//! Only the `bytes=start-end` form is understood. When a list is sent, the
//! first entry is used and the rest ignored. An omitted end means "through
//! the last byte".

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed Range header: {0:?}")]
    Malformed(String),

    #[error("range {start}-{end} is not satisfiable for {size} bytes")]
    Unsatisfiable { start: u64, end: u64, size: u64 },
}

/// An inclusive byte range inside a resource of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parses a `Range` header against a resource of `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`RangeError::Malformed`] if the value is not `bytes=N-[M]`
    /// - [`RangeError::Unsatisfiable`] unless `start <= end < size`
    pub fn parse(value: &str, size: u64) -> Result<Self, RangeError> {
        let malformed = || RangeError::Malformed(value.to_string());

        let spec = value.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
        let first = spec.split(',').next().unwrap_or_default().trim();
        let (start, end) = first.split_once('-').ok_or_else(malformed)?;

        let start: u64 = start.trim().parse().map_err(|_| malformed())?;
        let end = match end.trim() {
            "" => match size.checked_sub(1) {
                Some(last) => last,
                None => return Err(RangeError::Unsatisfiable { start, end: 0, size }),
            },
            explicit => explicit.parse().map_err(|_| malformed())?,
        };

        if start > end || end >= size {
            return Err(RangeError::Unsatisfiable { start, end, size });
        }
        Ok(Self { start, end })
    }

    /// Number of bytes covered. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this range.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}
