//! Periodic probe scheduler
//!
//! Sweeps the registry on a master tick and dispatches every enabled entry
//! whose last check is older than its interval. Dispatches are
//! fire-and-forget: a failing entry never stops the sweep, and the
//! dispatcher's single-flight table absorbs overlap with manual checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::ProbeDispatcher;
use crate::model::MonitoredUrl;
use crate::url_store::{UrlFilter, UrlStore};

/// Delay before the first sweep so subsystems can warm up.
const STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Floor on per-entry due intervals during sweeps.
const STALENESS_THRESHOLD: Duration = Duration::from_secs(30);

/// Freshness window for the opportunistic refresh on list reads.
const FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// Bounded wait for in-flight probes during shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Periodic sweeper over the registry.
pub struct Scheduler {
    store: UrlStore,
    dispatcher: Arc<ProbeDispatcher>,
    sweep_interval: Duration,
    shutdown_flag: AtomicBool,
    shutdown: Notify,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        store: UrlStore,
        dispatcher: Arc<ProbeDispatcher>,
        sweep_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            dispatcher,
            sweep_interval,
            shutdown_flag: AtomicBool::new(false),
            shutdown: Notify::new(),
            sweep_task: Mutex::new(None),
        })
    }

    /// Start the sweep loop. The first sweep is deferred briefly so the
    /// store, browser, and push bus finish warming up.
    pub async fn start(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            scheduler.sweep_loop().await;
        });
        *self.sweep_task.lock().await = Some(task);
        info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "scheduler started"
        );
    }

    /// Signal shutdown, wait for the loop to exit, then wait (bounded) for
    /// in-flight dispatches; stragglers keep running detached and their
    /// persistence resolves through version guards.
    pub async fn stop(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        if let Some(task) = self.sweep_task.lock().await.take()
            && tokio::time::timeout(Duration::from_secs(5), task).await.is_err()
        {
            warn!("sweep loop did not exit in time");
        }

        let remaining = self.dispatcher.drain(DRAIN_DEADLINE).await;
        if remaining > 0 {
            warn!(remaining, "shutdown proceeding with probes still in flight");
        }
        info!("scheduler stopped");
    }

    /// Opportunistic refresh for list reads: entries whose last check is
    /// older than the freshness window are redispatched without awaiting.
    /// Single-flight guarantees this never doubles up a running probe.
    pub fn refresh_stale(self: &Arc<Self>, entries: &[MonitoredUrl]) {
        let now = Utc::now();
        for entry in entries {
            if !entry.enabled {
                continue;
            }
            let stale = match entry.last_checked {
                Some(checked) => {
                    now.signed_duration_since(checked).num_milliseconds()
                        >= FRESHNESS_WINDOW.as_millis() as i64
                }
                None => true,
            };
            if stale {
                self.spawn_dispatch(entry.id.clone());
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        // Warm-up deferral, interruptible by shutdown.
        tokio::select! {
            () = tokio::time::sleep(STARTUP_DELAY) => {}
            () = self.shutdown.notified() => return,
        }

        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // the first tick completes immediately

        while !self.shutdown_flag.load(Ordering::SeqCst) {
            self.sweep_once().await;
            tokio::select! {
                _ = interval.tick() => {}
                () = self.shutdown.notified() => break,
            }
        }
        debug!("sweep loop exiting");
    }

    /// One sweep: enumerate enabled entries and dispatch the due ones.
    async fn sweep_once(&self) {
        let entries = match self
            .store
            .find_all(&UrlFilter { enabled: Some(true), ..UrlFilter::default() })
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "sweep could not enumerate registry");
                return;
            }
        };

        let now = Utc::now();
        let mut dispatched = 0usize;
        for entry in &entries {
            if !self.is_due(entry, now) {
                continue;
            }
            self.spawn_dispatch(entry.id.clone());
            dispatched += 1;
        }
        debug!(total = entries.len(), dispatched, "sweep complete");
    }

    fn is_due(&self, entry: &MonitoredUrl, now: chrono::DateTime<Utc>) -> bool {
        let Some(last_checked) = entry.last_checked else {
            return true;
        };
        let due_after = entry
            .check_interval_ms
            .max(STALENESS_THRESHOLD.as_millis() as u64);
        now.signed_duration_since(last_checked).num_milliseconds() >= due_after as i64
    }

    fn spawn_dispatch(&self, url_id: String) {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&url_id).await {
                debug!(url_id, error = %e, "scheduled probe failed");
            }
        });
    }
}
