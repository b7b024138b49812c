//! Cookie helpers
//!
//! Reading splits the `Cookie` request header into a name/value map;
//! writing builds one `Set-Cookie` value per [`SetCookie`]. Names and
//! values are percent-encoded on the way out and decoded on the way in.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Parses a `Cookie` header value (`a=1; b=2`).
///
/// Entries without exactly one `=` are skipped.
pub fn parse_cookie_header(value: &str) -> HashMap<String, String> {
    value
        .split(';')
        .filter_map(|entry| {
            let mut parts = entry.trim().split('=');
            let (name, value) = (parts.next()?, parts.next()?);
            if parts.next().is_some() || name.is_empty() {
                return None;
            }
            Some((decode(name), decode(value)))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// A cookie to send back to the client.
///
/// # Example
///
/// ```ignore
/// let cookie = SetCookie::new("session", "abc")
///     .path("/")
///     .expires_in(Duration::from_secs(3600))
///     .http_only(true);
/// response.set_cookie(cookie);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    expires: Option<SystemTime>,
    domain: Option<String>,
    path: Option<String>,
    secure: bool,
    http_only: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
        }
    }

    /// Expires the cookie `ttl` from now.
    pub fn expires_in(self, ttl: Duration) -> Self {
        self.expires_at(SystemTime::now() + ttl)
    }

    pub fn expires_at(mut self, when: SystemTime) -> Self {
        self.expires = Some(when);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            urlencoding::encode(&self.name),
            urlencoding::encode(&self.value)
        )?;
        if let Some(when) = self.expires {
            write!(f, "; Expires={}", httpdate::fmt_http_date(when))?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}
