//! Storage key layout.
//!
//! Every session owns two records: the data record and the expiration
//! marker. Keys render as `smplsess|<namespace>|<id>` and
//! `smplsess_expires|<namespace>|<id>` so existing stores stay readable.

use std::fmt;

use crate::error::{Error, Result};

/// Prefix of data record keys.
pub const DATA_PREFIX: &str = "smplsess|";

/// Prefix of expiration marker keys.
pub const MARKER_PREFIX: &str = "smplsess_expires|";

/// Which record of a session pair a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// The session's key/value data.
    Data,
    /// The session's expiration timestamp.
    Expires,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            RecordKind::Data => DATA_PREFIX,
            RecordKind::Expires => MARKER_PREFIX,
        }
    }
}

/// Structured key of a session record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub namespace: String,
    pub id: String,
}

impl RecordKey {
    /// Key of the data record for `(namespace, id)`.
    pub fn data(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Data,
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Key of the expiration marker for `(namespace, id)`.
    pub fn expires(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Expires,
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// The other record of the same pair.
    pub fn paired(&self) -> Self {
        let kind = match self.kind {
            RecordKind::Data => RecordKind::Expires,
            RecordKind::Expires => RecordKind::Data,
        };
        Self {
            kind,
            namespace: self.namespace.clone(),
            id: self.id.clone(),
        }
    }

    /// Parse a rendered key. Returns `None` for foreign keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, rest) = if let Some(rest) = raw.strip_prefix(MARKER_PREFIX) {
            (RecordKind::Expires, rest)
        } else if let Some(rest) = raw.strip_prefix(DATA_PREFIX) {
            (RecordKind::Data, rest)
        } else {
            return None;
        };

        let (namespace, id) = rest.split_once('|')?;
        if namespace.is_empty() || id.is_empty() || id.contains('|') {
            return None;
        }

        Some(Self {
            kind,
            namespace: namespace.to_string(),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}|{}", self.kind.prefix(), self.namespace, self.id)
    }
}

/// Reject namespaces that cannot serve as a cookie name and key segment.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let bad = namespace.is_empty()
        || namespace.chars().any(|c| {
            matches!(c, '|' | ';' | '=' | ',' | '"' | '\\') || c.is_whitespace() || c.is_control()
        });
    if bad {
        return Err(Error::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}
