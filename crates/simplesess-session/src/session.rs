//! The session object.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::keys::{RecordKey, validate_namespace};
use crate::store::RecordStore;
use crate::token::generate_id;
use crate::wire::SessionToken;

/// One client's session within a namespace.
///
/// Holds the token triple and an in-memory copy of the session data. Reads
/// and writes of the data never touch the store; [`Session::flush`] persists
/// them, and only when something changed.
pub struct Session {
    namespace: String,
    id: String,
    expires_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
    data: Map<String, Value>,
    dirty: bool,
    is_new: bool,
    store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("namespace", &self.namespace)
            .field("id", &self.id)
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .field("keys", &self.data.len())
            .field("dirty", &self.dirty)
            .field("is_new", &self.is_new)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session at `now`.
    ///
    /// Without a token a fresh id and expiry window are generated. With a
    /// token its triple is adopted as-is; once `now` is past the token's
    /// refresh time the window is recomputed and the new expiration is
    /// written to the marker record straight away. The data record is then
    /// loaded (absent means empty).
    pub fn open(
        namespace: &str,
        token: Option<SessionToken>,
        store: Arc<dyn RecordStore>,
        config: &SessionConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        validate_namespace(namespace)?;

        let is_new = token.is_none();
        let mut refreshed = false;
        let (id, expires_at, refresh_at) = match token {
            None => {
                let (expires_at, refresh_at) = config.expiry_window(now);
                let id = generate_id();
                debug!(namespace = %namespace, "Starting new session");
                (id, expires_at, refresh_at)
            }
            Some(token) if now > token.refresh_at => {
                let (expires_at, refresh_at) = config.expiry_window(now);
                refreshed = true;
                (token.id, expires_at, refresh_at)
            }
            Some(token) => (token.id, token.expires_at, token.refresh_at),
        };

        let mut session = Self {
            namespace: namespace.to_string(),
            id,
            expires_at,
            refresh_at,
            data: Map::new(),
            dirty: false,
            is_new,
            store,
        };
        let stored = session.read_data()?;

        // A session that never stored data has no marker to extend; the
        // first flush writes one.
        if refreshed && stored {
            let marker = session.data_key().paired().to_string();
            session
                .store
                .update(&marker, &Value::from(session.expires_at.timestamp()))?;
            debug!(
                namespace = %namespace,
                expires_at = %session.expires_at,
                "Session past refresh time, expiration extended"
            );
        }
        Ok(session)
    }

    fn data_key(&self) -> RecordKey {
        RecordKey::data(&self.namespace, &self.id)
    }

    /// Load the data record. Returns whether one exists.
    fn read_data(&mut self) -> Result<bool> {
        let key = self.data_key().to_string();
        let record = self.store.get(&key)?;
        let stored = record.is_some();
        self.data = match record {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(Error::CorruptRecord {
                    key,
                    reason: format!("expected an object, found {}", kind_of(&other)),
                });
            }
        };
        self.dirty = false;
        trace!(namespace = %self.namespace, keys = self.data.len(), "Session data loaded");
        Ok(stored)
    }

    /// Namespace this session belongs to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session expires. Read-only.
    pub fn cache_expiration(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// When the persisted expiration will next be refreshed.
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.refresh_at
    }

    /// The triple to hand to the client.
    pub fn token(&self) -> SessionToken {
        SessionToken {
            id: self.id.clone(),
            expires_at: self.expires_at,
            refresh_at: self.refresh_at,
        }
    }

    /// Whether the session was created in this scope rather than rehydrated.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Whether there are unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Value stored under `key`, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Error::from)
    }

    /// All session data.
    pub fn all(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Insert or overwrite a single key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
        self.dirty = true;
    }

    /// Merge many keys at once. Incoming values win on conflicts.
    pub fn merge<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.data.extend(entries);
        self.dirty = true;
    }

    /// Remove a single key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Clear all session data. The cleared state is persisted on flush.
    pub fn reset(&mut self) {
        self.data.clear();
        self.dirty = true;
    }

    /// Persist the data if it changed.
    ///
    /// The first write of a session stores the expiration marker and then
    /// creates the data record; later writes only update the data record.
    /// A data record never exists without its marker, so a write that fails
    /// halfway is repaired by the next flush. Returns whether anything was
    /// written.
    pub fn flush(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let data_key = self.data_key();
        let raw_key = data_key.to_string();
        let value = Value::Object(self.data.clone());

        if self.store.get(&raw_key)?.is_none() {
            let marker = data_key.paired().to_string();
            self.store
                .update(&marker, &Value::from(self.expires_at.timestamp()))?;
            if !self.store.create(&raw_key, &value)? {
                // Another writer created the record since our read; last write wins.
                self.store.update(&raw_key, &value)?;
            }
        } else {
            self.store.update(&raw_key, &value)?;
        }

        self.dirty = false;
        trace!(namespace = %self.namespace, keys = self.data.len(), "Session data flushed");
        Ok(true)
    }

    /// Switch to a freshly generated id.
    ///
    /// With `delete_old` the old data record and its marker are removed.
    /// Expiration and in-memory data are kept; non-empty data is marked
    /// dirty so the next flush stores it under the new id. Returns the new
    /// token for the transport.
    pub fn regenerate_id(&mut self, delete_old: bool) -> Result<SessionToken> {
        if delete_old {
            let data_key = self.data_key();
            let keys = [data_key.to_string(), data_key.paired().to_string()];
            self.store.delete_many(&keys)?;
        }

        self.id = generate_id();
        if !self.data.is_empty() {
            self.dirty = true;
        }
        debug!(namespace = %self.namespace, delete_old, "Session id regenerated");
        Ok(self.token())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;

    fn open_new(store: &Arc<MemoryStore>) -> Session {
        Session::open(
            "simple",
            None,
            store.clone(),
            &SessionConfig::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_session_window() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let session =
            Session::open("simple", None, store.clone(), &SessionConfig::default(), now).unwrap();

        assert!(session.is_new());
        assert!(!session.is_dirty());
        assert!(session.refresh_at() < session.cache_expiration());
        assert!(session.refresh_at() > now);
        assert!(session.all().is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);

        session.set("user", "ada");
        session.set("visits", 3);
        assert_eq!(session.get("user"), Some(&json!("ada")));
        assert_eq!(session.get_as::<u32>("visits").unwrap(), Some(3));
        assert_eq!(session.get("missing"), None);
        assert!(session.is_dirty());
    }

    #[test]
    fn test_merge_incoming_wins() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        session.set("a", 1);
        session.set("b", 2);

        session.merge([("b".to_string(), json!(20)), ("c".to_string(), json!(30))]);

        assert_eq!(session.get("a"), Some(&json!(1)));
        assert_eq!(session.get("b"), Some(&json!(20)));
        assert_eq!(session.get("c"), Some(&json!(30)));
    }

    #[test]
    fn test_reset_marks_dirty() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        session.set("a", 1);
        session.flush().unwrap();
        assert!(!session.is_dirty());

        session.reset();
        assert!(session.is_dirty());
        session.flush().unwrap();

        let key = RecordKey::data("simple", session.id()).to_string();
        assert_eq!(store.peek(&key), Some(json!({})));
    }

    #[test]
    fn test_remove_only_dirties_when_present() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        assert_eq!(session.remove("nothing"), None);
        assert!(!session.is_dirty());

        session.set("a", 1);
        session.flush().unwrap();
        assert_eq!(session.remove("a"), Some(json!(1)));
        assert!(session.is_dirty());
    }

    #[test]
    fn test_first_flush_creates_pair() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        session.set("a", 1);

        assert!(session.flush().unwrap());

        let data = RecordKey::data("simple", session.id()).to_string();
        let marker = RecordKey::expires("simple", session.id()).to_string();
        assert_eq!(store.peek(&data), Some(json!({"a": 1})));
        assert_eq!(
            store.peek(&marker),
            Some(json!(session.cache_expiration().timestamp()))
        );
    }

    #[test]
    fn test_later_flush_updates_data_only() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        session.set("a", 1);
        session.flush().unwrap();

        store.reset_ops();
        session.set("a", 2);
        session.flush().unwrap();

        let ops = store.ops();
        assert_eq!(ops.creates, 0);
        assert_eq!(ops.updates, 1);
    }

    #[test]
    fn test_clean_flush_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        store.reset_ops();

        assert!(!session.flush().unwrap());
        assert_eq!(store.ops().writes(), 0);
        assert_eq!(store.ops().gets, 0);

        session.set("a", 1);
        assert!(session.flush().unwrap());
        let writes = store.ops().writes();
        assert!(!session.flush().unwrap());
        assert_eq!(store.ops().writes(), writes);
    }

    #[test]
    fn test_rehydrate_before_refresh_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let token = SessionToken {
            id: "abc".to_string(),
            expires_at: now + Duration::seconds(600),
            refresh_at: now + Duration::seconds(60),
        };
        store
            .update("smplsess|simple|abc", &json!({"user": "ada"}))
            .unwrap();
        store.reset_ops();

        let session = Session::open(
            "simple",
            Some(token.clone()),
            store.clone(),
            &SessionConfig::default(),
            now,
        )
        .unwrap();

        assert!(!session.is_new());
        assert_eq!(session.token(), token);
        assert_eq!(session.get("user"), Some(&json!("ada")));
        assert_eq!(store.ops().writes(), 0);
    }

    #[test]
    fn test_rehydrate_after_refresh_rewrites_marker() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.update("smplsess|simple|abc", &json!({"a": 1})).unwrap();
        store
            .update("smplsess_expires|simple|abc", &json!(now.timestamp() + 100))
            .unwrap();
        store.reset_ops();
        let token = SessionToken {
            id: "abc".to_string(),
            expires_at: now + Duration::seconds(100),
            refresh_at: now - Duration::seconds(10),
        };

        let session = Session::open(
            "simple",
            Some(token),
            store.clone(),
            &SessionConfig::default(),
            now,
        )
        .unwrap();

        let ops = store.ops();
        assert_eq!(ops.updates, 1);
        assert_eq!(ops.creates, 0);
        assert_eq!(session.cache_expiration(), now + Duration::seconds(1800));
        assert_eq!(
            store.peek("smplsess_expires|simple|abc"),
            Some(json!((now + Duration::seconds(1800)).timestamp()))
        );
        assert_eq!(store.peek("smplsess|simple|abc"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_refresh_without_data_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let token = SessionToken {
            id: "abc".to_string(),
            expires_at: now + Duration::seconds(100),
            refresh_at: now - Duration::seconds(10),
        };

        let mut session = Session::open(
            "simple",
            Some(token),
            store.clone(),
            &SessionConfig::default(),
            now,
        )
        .unwrap();

        assert_eq!(store.ops().writes(), 0);
        assert!(store.is_empty());
        assert_eq!(session.cache_expiration(), now + Duration::seconds(1800));

        // The extended window reaches the store with the first write.
        session.set("a", 1);
        session.flush().unwrap();
        assert_eq!(
            store.peek("smplsess_expires|simple|abc"),
            Some(json!((now + Duration::seconds(1800)).timestamp()))
        );
    }

    #[test]
    fn test_corrupt_data_record() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.update("smplsess|simple|abc", &json!("oops")).unwrap();
        let token = SessionToken {
            id: "abc".to_string(),
            expires_at: now + Duration::seconds(600),
            refresh_at: now + Duration::seconds(60),
        };

        let err = Session::open("simple", Some(token), store, &SessionConfig::default(), now)
            .unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { .. }));
    }

    #[test]
    fn test_regenerate_deletes_old_pair() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        session.set("a", 1);
        session.flush().unwrap();
        let old_id = session.id().to_string();
        let expires = session.cache_expiration();

        let token = session.regenerate_id(true).unwrap();

        assert_ne!(token.id, old_id);
        assert_eq!(token.expires_at, expires);
        assert!(!store.contains(&RecordKey::data("simple", &old_id).to_string()));
        assert!(!store.contains(&RecordKey::expires("simple", &old_id).to_string()));
        assert_eq!(session.get("a"), Some(&json!(1)));
        assert!(session.is_dirty());
    }

    #[test]
    fn test_regenerate_keeps_old_records() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open_new(&store);
        session.set("a", 1);
        session.flush().unwrap();
        let old_id = session.id().to_string();

        session.regenerate_id(false).unwrap();
        session.flush().unwrap();

        assert!(store.contains(&RecordKey::data("simple", &old_id).to_string()));
        assert!(store.contains(&RecordKey::data("simple", session.id()).to_string()));
    }

    /// Fails the next `failures` writes to keys starting with `prefix`.
    struct FlakyStore {
        inner: MemoryStore,
        prefix: &'static str,
        failures: std::sync::atomic::AtomicUsize,
    }

    impl FlakyStore {
        fn new(prefix: &'static str, failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                prefix,
                failures: failures.into(),
            }
        }

        fn check(&self, key: &str) -> Result<()> {
            use std::sync::atomic::Ordering;
            if key.starts_with(self.prefix)
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::Store("write rejected".to_string()));
            }
            Ok(())
        }
    }

    impl RecordStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key)
        }
        fn create(&self, key: &str, value: &Value) -> Result<bool> {
            self.check(key)?;
            self.inner.create(key, value)
        }
        fn update(&self, key: &str, value: &Value) -> Result<()> {
            self.check(key)?;
            self.inner.update(key, value)
        }
        fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key)
        }
        fn delete_many(&self, keys: &[String]) -> Result<usize> {
            self.inner.delete_many(keys)
        }
        fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
            self.inner.scan_prefix(prefix)
        }
    }

    fn open_flaky(store: &Arc<FlakyStore>) -> Session {
        Session::open(
            "simple",
            None,
            store.clone(),
            &SessionConfig::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_failed_marker_write_leaves_no_data() {
        let store = Arc::new(FlakyStore::new(crate::keys::MARKER_PREFIX, 1));
        let mut session = open_flaky(&store);
        session.set("a", 1);
        let data = RecordKey::data("simple", session.id()).to_string();
        let marker = RecordKey::expires("simple", session.id()).to_string();

        assert!(matches!(session.flush(), Err(Error::Store(_))));
        assert!(session.is_dirty());
        assert!(!store.inner.contains(&data));
        assert!(!store.inner.contains(&marker));

        assert!(session.flush().unwrap());
        assert!(!session.is_dirty());
        assert_eq!(store.inner.peek(&data), Some(json!({"a": 1})));
        assert_eq!(
            store.inner.peek(&marker),
            Some(json!(session.cache_expiration().timestamp()))
        );
    }

    #[test]
    fn test_failed_data_write_is_repaired_by_retry() {
        let store = Arc::new(FlakyStore::new(crate::keys::DATA_PREFIX, 1));
        let mut session = open_flaky(&store);
        session.set("a", 1);
        let data = RecordKey::data("simple", session.id()).to_string();
        let marker = RecordKey::expires("simple", session.id()).to_string();

        assert!(session.flush().is_err());
        assert!(session.is_dirty());
        // The marker alone is harmless: GC deletes it once it expires.
        assert!(store.inner.contains(&marker));
        assert!(!store.inner.contains(&data));

        assert!(session.flush().unwrap());
        assert_eq!(store.inner.peek(&data), Some(json!({"a": 1})));
        assert_eq!(
            store.inner.peek(&marker),
            Some(json!(session.cache_expiration().timestamp()))
        );
    }

    #[test]
    fn test_invalid_namespace() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let err = Session::open("bad|ns", None, store, &SessionConfig::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNamespace(_)));
    }
}
