//! Batch garbage collection of expired sessions.
//!
//! Scans every expiration marker, and deletes each expired marker together
//! with its data record in one batch. Designed to be driven by
//! [`GcScheduler`](crate::GcScheduler) or an external cron.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::keys::{MARKER_PREFIX, RecordKey};
use crate::store::RecordStore;

/// Capacity of the event channel. Slow subscribers miss old events.
const EVENT_CAPACITY: usize = 16;

/// A session removed (or, in dry-run mode, due for removal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredSession {
    pub namespace: String,
    pub id: String,
    /// Expiration read from the marker; `None` if it was unreadable.
    pub expired_at: Option<DateTime<Utc>>,
}

/// Result of one collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Number of expiration markers scanned.
    pub markers_scanned: usize,
    /// Number of expired sessions found.
    pub sessions_expired: usize,
    /// Number of records actually deleted (markers plus data records).
    pub records_deleted: usize,
    /// The expired sessions.
    pub expired: Vec<ExpiredSession>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// Notification broadcast after every collection run.
#[derive(Debug, Clone)]
pub enum GcEvent {
    /// The run finished.
    Completed(CollectionReport),
    /// The run failed; it will be retried on the next schedule.
    Failed(String),
}

/// Deletes expired session record pairs.
pub struct GarbageCollector {
    store: Arc<dyn RecordStore>,
    dry_run: bool,
    events: broadcast::Sender<GcEvent>,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("dry_run", &self.dry_run)
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    /// Create a collector over `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            dry_run: false,
            events,
        }
    }

    /// Report what would be deleted without deleting anything.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Subscribe to run notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<GcEvent> {
        self.events.subscribe()
    }

    /// Delete every session whose expiration is in the past.
    pub fn collect_expired(&self) -> Result<CollectionReport> {
        self.collect_expired_at(Utc::now())
    }

    /// [`collect_expired`](Self::collect_expired) with an explicit clock.
    pub fn collect_expired_at(&self, now: DateTime<Utc>) -> Result<CollectionReport> {
        match self.run(now) {
            Ok(report) => {
                info!(
                    markers_scanned = report.markers_scanned,
                    sessions_expired = report.sessions_expired,
                    records_deleted = report.records_deleted,
                    dry_run = report.dry_run,
                    "Session garbage collection completed"
                );
                let _ = self.events.send(GcEvent::Completed(report.clone()));
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Session garbage collection failed");
                let _ = self.events.send(GcEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn run(&self, now: DateTime<Utc>) -> Result<CollectionReport> {
        let markers = self.store.scan_prefix(MARKER_PREFIX)?;
        let cutoff = now.timestamp();

        let mut doomed = Vec::new();
        let mut expired = Vec::new();

        for (raw, value) in &markers {
            let Some(key) = RecordKey::parse(raw) else {
                warn!(key = %raw, "Skipping unrecognised expiration marker");
                continue;
            };

            let expires = marker_timestamp(value);
            // Unreadable markers count as expired.
            if expires.is_some_and(|ts| ts >= cutoff) {
                continue;
            }

            debug!(namespace = %key.namespace, expires = ?expires, "Session expired");
            doomed.push(raw.clone());
            doomed.push(key.paired().to_string());
            expired.push(ExpiredSession {
                namespace: key.namespace,
                id: key.id,
                expired_at: expires.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            });
        }

        let records_deleted = if self.dry_run || doomed.is_empty() {
            0
        } else {
            self.store.delete_many(&doomed)?
        };

        Ok(CollectionReport {
            markers_scanned: markers.len(),
            sessions_expired: expired.len(),
            records_deleted,
            expired,
            dry_run: self.dry_run,
            finished_at: Utc::now(),
        })
    }
}

/// Read a marker's unix timestamp. Numeric strings are accepted.
pub fn marker_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
