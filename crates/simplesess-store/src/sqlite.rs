//! SQLite implementation of [`RecordStore`].

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use simplesess_session::RecordStore;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

/// Keys per `DELETE ... IN (...)` statement, below SQLite's parameter limit.
const DELETE_CHUNK: usize = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Record store backed by an SQLite `options` table.
///
/// Values are stored as JSON text. Uses WAL mode so the garbage collector's
/// scans don't block request traffic.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directory and the schema if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.initialize(true)?;

        info!("Session store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize(false)?;

        debug!("In-memory session store created");
        Ok(store)
    }

    /// Database path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(&self, wal: bool) -> Result<()> {
        let conn = self.conn.lock();

        if wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);
        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS options (
                option_name TEXT PRIMARY KEY NOT NULL,
                option_value TEXT NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Load a record.
    pub fn get_record(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT option_value FROM options WHERE option_name = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    /// Insert a record if absent. Returns whether a row was inserted.
    pub fn create_record(&self, key: &str, value: &Value) -> Result<bool> {
        let json = serde_json::to_string(value)?;
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO options (option_name, option_value) VALUES (?1, ?2)",
            params![key, json],
        )?;
        trace!(key = %key, inserted, "create");
        Ok(inserted == 1)
    }

    /// Insert or overwrite a record.
    pub fn update_record(&self, key: &str, value: &Value) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn.lock().execute(
            "INSERT INTO options (option_name, option_value) VALUES (?1, ?2)
             ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value",
            params![key, json],
        )?;
        trace!(key = %key, "update");
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete_record(&self, key: &str) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM options WHERE option_name = ?1", params![key])?;
        Ok(deleted > 0)
    }

    /// Delete many records in one transaction.
    pub fn delete_records(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("DELETE FROM options WHERE option_name IN ({placeholders})");
            deleted += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;

        debug!(requested = keys.len(), deleted, "Batch delete committed");
        Ok(deleted)
    }

    /// All records whose key starts with `prefix`, ordered by key.
    ///
    /// Values that do not decode as JSON are returned as [`Value::String`].
    pub fn scan_records(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT option_name, option_value FROM options
             WHERE option_name LIKE ?1 ESCAPE '\\' ORDER BY option_name",
        )?;

        let rows = stmt.query_map(params![like_prefix(prefix)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (name, raw) = row?;
            // LIKE is case-insensitive for ASCII; keep exact matches only.
            if !name.starts_with(prefix) {
                continue;
            }
            // Rows written by other tools may not be JSON; hand them over as
            // raw text instead of failing the whole scan.
            let value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key = %name, error = %e, "Record value is not JSON, returning raw text");
                    Value::String(raw)
                }
            };
            records.push((name, value));
        }
        Ok(records)
    }

    /// Number of records whose key starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> Result<usize> {
        Ok(self.scan_records(prefix)?.len())
    }
}

/// Build a `LIKE` pattern matching keys that start with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, key: &str) -> simplesess_session::Result<Option<Value>> {
        Ok(self.get_record(key)?)
    }

    fn create(&self, key: &str, value: &Value) -> simplesess_session::Result<bool> {
        Ok(self.create_record(key, value)?)
    }

    fn update(&self, key: &str, value: &Value) -> simplesess_session::Result<()> {
        Ok(self.update_record(key, value)?)
    }

    fn delete(&self, key: &str) -> simplesess_session::Result<bool> {
        Ok(self.delete_record(key)?)
    }

    fn delete_many(&self, keys: &[String]) -> simplesess_session::Result<usize> {
        Ok(self.delete_records(keys)?)
    }

    fn scan_prefix(&self, prefix: &str) -> simplesess_session::Result<Vec<(String, Value)>> {
        Ok(self.scan_records(prefix)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("smplsess_expires|"), "smplsess\\_expires|%");
        assert_eq!(like_prefix("100%"), "100\\%%");
    }

    #[test]
    fn test_crud() {
        let store = SqliteRecordStore::open_in_memory().unwrap();

        assert_eq!(store.get_record("k").unwrap(), None);
        assert!(store.create_record("k", &json!({"a": 1})).unwrap());
        assert!(!store.create_record("k", &json!({"a": 2})).unwrap());
        assert_eq!(store.get_record("k").unwrap(), Some(json!({"a": 1})));

        store.update_record("k", &json!({"a": 3})).unwrap();
        assert_eq!(store.get_record("k").unwrap(), Some(json!({"a": 3})));

        assert!(store.delete_record("k").unwrap());
        assert!(!store.delete_record("k").unwrap());
    }

    #[test]
    fn test_update_upserts() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.update_record("fresh", &json!(42)).unwrap();
        assert_eq!(store.get_record("fresh").unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_scan_is_exact_prefix() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.update_record("smplsess_expires|a|1", &json!(1)).unwrap();
        store.update_record("smplsess_expires|b|2", &json!(2)).unwrap();
        // `_` would match any character without escaping.
        store.update_record("smplsessXexpires|c|3", &json!(3)).unwrap();
        store.update_record("SMPLSESS_EXPIRES|d|4", &json!(4)).unwrap();
        store.update_record("smplsess|a|1", &json!({})).unwrap();

        let found = store.scan_records("smplsess_expires|").unwrap();
        assert_eq!(
            found,
            vec![
                ("smplsess_expires|a|1".to_string(), json!(1)),
                ("smplsess_expires|b|2".to_string(), json!(2)),
            ]
        );
        assert_eq!(store.count_prefix("smplsess|").unwrap(), 1);
    }

    #[test]
    fn test_delete_many_chunks() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let keys: Vec<String> = (0..1_200).map(|i| format!("smplsess|ns|{i}")).collect();
        for key in &keys {
            store.update_record(key, &json!({})).unwrap();
        }
        store.update_record("keep", &json!(true)).unwrap();

        let mut doomed = keys.clone();
        doomed.push("missing".to_string());
        assert_eq!(store.delete_records(&doomed).unwrap(), 1_200);
        assert_eq!(store.count_prefix("smplsess|").unwrap(), 0);
        assert_eq!(store.get_record("keep").unwrap(), Some(json!(true)));
        assert_eq!(store.delete_records(&[]).unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sessions.db");

        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.update_record("smplsess|simple|abc", &json!({"user": "ada"})).unwrap();
        }

        let store = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(
            store.get_record("smplsess|simple|abc").unwrap(),
            Some(json!({"user": "ada"}))
        );
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO options (option_name, option_value) VALUES ('bad', 'a:0:{}')",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.get_record("bad"),
            Err(StoreError::Serialization(_))
        ));
        let err: simplesess_session::Error = store.get_record("bad").unwrap_err().into();
        assert!(matches!(err, simplesess_session::Error::Store(_)));
    }

    #[test]
    fn test_scan_passes_undecodable_values_through() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.update_record("smplsess_expires|simple|A", &json!(5)).unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO options (option_name, option_value) VALUES
                 ('smplsess_expires|simple|B', ''),
                 ('smplsess_expires|simple|C', 'a:0:{}')",
                [],
            )
            .unwrap();

        let found = store.scan_records("smplsess_expires|").unwrap();
        assert_eq!(
            found,
            vec![
                ("smplsess_expires|simple|A".to_string(), json!(5)),
                ("smplsess_expires|simple|B".to_string(), json!("")),
                ("smplsess_expires|simple|C".to_string(), json!("a:0:{}")),
            ]
        );
    }
}
