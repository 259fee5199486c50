//! Expiration policy and cookie settings.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::wire::CookieOptions;

/// Default session lifetime past the last refresh (30 minutes).
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(30 * 60);

/// Default refresh variant (24 minutes).
///
/// The expiration marker is only rewritten once a request arrives after this
/// point, so an active session costs at most one marker write per variant.
pub const DEFAULT_REFRESH_VARIANT: Duration = Duration::from_secs(24 * 60);

/// Configuration for sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session stays valid after its expiration was last computed.
    pub expiration: Duration,

    /// Offset after which the persisted expiration is refreshed.
    /// Must be strictly shorter than `expiration`.
    pub refresh_variant: Duration,

    /// Attributes applied to issued session cookies.
    pub cookie: CookieOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            refresh_variant: DEFAULT_REFRESH_VARIANT,
            cookie: CookieOptions::default(),
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session expiration.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Set the refresh variant.
    pub fn with_refresh_variant(mut self, variant: Duration) -> Self {
        self.refresh_variant = variant;
        self
    }

    /// Set the cookie attributes.
    pub fn with_cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    /// Check `0 < refresh_variant < expiration`.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_variant.is_zero() {
            return Err(Error::InvalidConfig(
                "refresh variant must be greater than zero".to_string(),
            ));
        }
        if self.refresh_variant >= self.expiration {
            return Err(Error::InvalidConfig(format!(
                "refresh variant ({}s) must be shorter than expiration ({}s)",
                self.refresh_variant.as_secs(),
                self.expiration.as_secs()
            )));
        }
        Ok(())
    }

    /// Compute `(expires_at, refresh_at)` for a session touched at `now`.
    pub fn expiry_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let expires_at = now + secs(self.expiration);
        let refresh_at = now + secs(self.refresh_variant);
        (expires_at, refresh_at)
    }
}

fn secs(d: Duration) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX / 1000))
}
