//! Session token wire format and transports.
//!
//! A client holds one token per namespace: `id||expires_at||refresh_at`,
//! with both timestamps in unix seconds. The transport is whatever carries
//! that string between requests, normally a cookie named after the namespace.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const SEPARATOR: &str = "||";

/// Identity and expiration triple carried by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_at: DateTime<Utc>,
}

impl SessionToken {
    /// Render as `id||expires_at||refresh_at`.
    pub fn to_wire(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.id,
            self.expires_at.timestamp(),
            self.refresh_at.timestamp()
        )
    }

    /// Parse a client-supplied token.
    ///
    /// Backslash escapes added by legacy clients are stripped first. The
    /// token must have exactly three fields, a non-empty id, unix-second
    /// timestamps, and `refresh_at < expires_at`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = strip_slashes(raw.trim());
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let [id, expires, refresh] = parts.as_slice() else {
            return Err(Error::MalformedToken(format!(
                "expected 3 fields, found {}",
                parts.len()
            )));
        };

        if id.is_empty() || id.contains('|') {
            return Err(Error::MalformedToken("invalid session id".to_string()));
        }

        let expires_at = parse_timestamp(expires)?;
        let refresh_at = parse_timestamp(refresh)?;
        if refresh_at >= expires_at {
            return Err(Error::MalformedToken(
                "refresh time is not before expiration".to_string(),
            ));
        }

        Ok(Self {
            id: (*id).to_string(),
            expires_at,
            refresh_at,
        })
    }
}

fn parse_timestamp(field: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = field
        .parse()
        .map_err(|_| Error::MalformedToken(format!("invalid timestamp '{field}'")))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::MalformedToken(format!("timestamp out of range '{field}'")))
}

fn strip_slashes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Carries session tokens between the client and the registry.
pub trait TokenTransport: Send + Sync {
    /// Raw token the client presented for `namespace`, if any.
    fn read(&self, namespace: &str) -> Option<String>;

    /// Hand a (new or refreshed) token back to the client.
    fn issue(&self, namespace: &str, token: &SessionToken);
}

/// Attributes of issued session cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    /// `Path` attribute.
    pub path: String,
    /// `Domain` attribute; omitted when `None`.
    pub domain: Option<String>,
    /// Add the `Secure` attribute.
    pub secure: bool,
    /// Add the `HttpOnly` attribute.
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
        }
    }
}

/// Cookie-backed transport for one HTTP request.
///
/// Built from the request's `Cookie` header; collects the `Set-Cookie`
/// values to send with the response. The cookie name is the namespace.
#[derive(Debug, Default)]
pub struct CookieTransport {
    incoming: HashMap<String, String>,
    outgoing: Mutex<Vec<(String, String)>>,
    options: CookieOptions,
}

impl CookieTransport {
    /// Create a transport from a `Cookie` request header.
    pub fn from_header(header: Option<&str>, options: CookieOptions) -> Self {
        let incoming = header.map(parse_cookie_header).unwrap_or_default();
        Self {
            incoming,
            outgoing: Mutex::new(Vec::new()),
            options,
        }
    }

    /// `Set-Cookie` header values, one per namespace (latest issue wins).
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.outgoing
            .lock()
            .iter()
            .map(|(_, header)| header.clone())
            .collect()
    }

    fn render(&self, name: &str, token: &SessionToken) -> String {
        let mut header = format!(
            "{name}={}; Expires={}; Path={}",
            token.to_wire(),
            token.expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.options.path
        );
        if let Some(domain) = &self.options.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if self.options.secure {
            header.push_str("; Secure");
        }
        if self.options.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

impl TokenTransport for CookieTransport {
    fn read(&self, namespace: &str) -> Option<String> {
        self.incoming.get(namespace).cloned()
    }

    fn issue(&self, namespace: &str, token: &SessionToken) {
        let header = self.render(namespace, token);
        let mut outgoing = self.outgoing.lock();
        match outgoing.iter_mut().find(|(name, _)| name == namespace) {
            Some(entry) => entry.1 = header,
            None => outgoing.push((namespace.to_string(), header)),
        }
    }
}

fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Map-backed transport for hosts without cookies, and for tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    presented: Mutex<HashMap<String, String>>,
    issued: Mutex<Vec<(String, SessionToken)>>,
}

impl MemoryTransport {
    /// Create a transport with no presented tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Present a raw token for `namespace`, as a returning client would.
    pub fn with_token(self, namespace: impl Into<String>, raw: impl Into<String>) -> Self {
        self.presented.lock().insert(namespace.into(), raw.into());
        self
    }

    /// Every token issued so far, in order.
    pub fn issued(&self) -> Vec<(String, SessionToken)> {
        self.issued.lock().clone()
    }

    /// The most recent token issued for `namespace`.
    pub fn last_issued(&self, namespace: &str) -> Option<SessionToken> {
        self.issued
            .lock()
            .iter()
            .rev()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, token)| token.clone())
    }
}

impl TokenTransport for MemoryTransport {
    fn read(&self, namespace: &str) -> Option<String> {
        self.presented.lock().get(namespace).cloned()
    }

    fn issue(&self, namespace: &str, token: &SessionToken) {
        self.issued
            .lock()
            .push((namespace.to_string(), token.clone()));
    }
}
