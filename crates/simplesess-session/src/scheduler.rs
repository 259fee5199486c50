//! Periodic garbage collection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gc::GarbageCollector;

/// Default collection interval: twice a day.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Runs a [`GarbageCollector`] on a fixed interval.
///
/// Runs are sequential, so collections never overlap. A failed run is
/// logged and retried at the next tick. The first run starts immediately.
#[derive(Debug)]
pub struct GcScheduler {
    collector: Arc<GarbageCollector>,
    interval: Duration,
}

impl GcScheduler {
    /// Create a scheduler. A zero interval is replaced by the default.
    pub fn new(collector: Arc<GarbageCollector>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_GC_INTERVAL
        } else {
            interval
        };
        Self {
            collector,
            interval,
        }
    }

    /// The collection interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Session GC scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let collector = Arc::clone(&self.collector);
                    match tokio::task::spawn_blocking(move || collector.collect_expired()).await {
                        Ok(Ok(report)) => {
                            debug!(sessions_expired = report.sessions_expired, "Scheduled collection done");
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "Scheduled collection failed, retrying next interval");
                        }
                        Err(e) => {
                            warn!(error = %e, "Scheduled collection task aborted");
                        }
                    }
                }
            }
        }

        info!("Session GC scheduler stopped");
    }

    /// Spawn onto the current runtime. Cancel the returned token to stop.
    pub fn spawn(self) -> (JoinHandle<()>, CancellationToken) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.run(cancel.clone()));
        (handle, cancel)
    }
}
