//! Per-scope session registry.
//!
//! A registry is created for a request (or any other processing scope) and
//! passed to whatever needs sessions. It hands out at most one [`Session`]
//! per namespace and flushes every dirty session when the scope ends, either
//! through [`SessionRegistry::close`] or, failing that, on drop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::Session;
use crate::store::RecordStore;
use crate::wire::{SessionToken, TokenTransport};

/// Shared handle to a registry-owned session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Hands out one session per namespace for the lifetime of a scope.
pub struct SessionRegistry {
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn TokenTransport>,
    config: SessionConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry. Fails if the expiration settings are invalid.
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn TokenTransport>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the session for `namespace`, opening it on first use.
    pub fn factory(&self, namespace: &str) -> Result<SessionHandle> {
        self.factory_at(namespace, Utc::now())
    }

    /// [`factory`](Self::factory) with an explicit clock.
    pub fn factory_at(&self, namespace: &str, now: DateTime<Utc>) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(namespace) {
            return Ok(Arc::clone(handle));
        }

        let token = self.presented_token(namespace);
        let session = Session::open(namespace, token, Arc::clone(&self.store), &self.config, now)?;
        self.transport.issue(namespace, &session.token());

        let handle = Arc::new(Mutex::new(session));
        sessions.insert(namespace.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn presented_token(&self, namespace: &str) -> Option<SessionToken> {
        let raw = self.transport.read(namespace)?;
        match SessionToken::parse(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(namespace = %namespace, error = %e, "Ignoring malformed session token");
                None
            }
        }
    }

    /// Give the namespace's session a new id and issue it to the client.
    pub fn regenerate_id(&self, namespace: &str, delete_old: bool) -> Result<SessionToken> {
        let handle = self.factory(namespace)?;
        let token = handle.lock().regenerate_id(delete_old)?;
        self.transport.issue(namespace, &token);
        Ok(token)
    }

    /// Whether a session has been opened for `namespace` in this scope.
    pub fn session_started(&self, namespace: &str) -> bool {
        self.sessions.lock().contains_key(namespace)
    }

    /// Namespaces with an open session.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Flush every open session.
    ///
    /// All sessions are attempted; the first error is returned. Returns how
    /// many sessions were written.
    pub fn flush_all(&self) -> Result<usize> {
        let handles: Vec<SessionHandle> = self.sessions.lock().values().cloned().collect();
        let mut written = 0;
        let mut first_err = None;

        for handle in handles {
            let mut session = handle.lock();
            match session.flush() {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(namespace = %session.namespace(), error = %e, "Failed to flush session");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// End the scope, flushing every dirty session.
    ///
    /// The registry lets go of its sessions either way, so a failed flush is
    /// reported once and not retried on drop. Sessions that failed stay dirty
    /// in any handle the caller still holds.
    pub fn close(mut self) -> Result<usize> {
        let result = self.flush_all();
        self.sessions.get_mut().clear();
        result
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for (namespace, handle) in self.sessions.get_mut().drain() {
            let mut session = handle.lock();
            if !session.is_dirty() {
                continue;
            }
            if let Err(e) = session.flush() {
                warn!(namespace = %namespace, error = %e, "Dropping unflushed session data");
            }
        }
    }
}
