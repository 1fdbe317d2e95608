//! Probe dispatcher
//!
//! Owns the single-flight table, the per-probe timeout envelope, prober
//! selection, persistence with optimistic-concurrency retries, and event
//! emission. Concurrent dispatches for the same URL id join the in-flight
//! probe and share its outcome; the slot is released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::browser_probe::BrowserProber;
use crate::classifier::{classify, error_details, UrlStatus};
use crate::error::{EngineError, EngineResult};
use crate::http_probe::HttpProber;
use crate::model::{AuthConfig, MonitoredUrl, ProbeOutcome, ProbeResult};
use crate::monitor_events::{MonitorEvent, MonitorEventBus};
use crate::url_store::{StatusFields, UrlFilter, UrlStore};

/// Version-conflict retries after the initial attempt.
const PERSIST_RETRIES: u32 = 3;

/// Base backoff between persistence retries; doubles per attempt.
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// Floor on the deadline handed to browser probes.
const BROWSER_DEADLINE_FLOOR: Duration = Duration::from_secs(60);

/// A prober the dispatcher can select. The two engine probers implement
/// this; tests substitute counting fakes.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &MonitoredUrl, deadline: Duration) -> ProbeOutcome;
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &MonitoredUrl, deadline: Duration) -> ProbeOutcome {
        HttpProber::probe(self, &target.url, target.auth.as_ref(), deadline).await
    }
}

#[async_trait]
impl Prober for BrowserProber {
    async fn probe(&self, target: &MonitoredUrl, deadline: Duration) -> ProbeOutcome {
        let login = match &target.auth {
            Some(AuthConfig::BrowserLogin(config)) => Some(config),
            _ => None,
        };
        BrowserProber::probe(self, &target.url, login, deadline).await
    }
}

type FlightReceiver = watch::Receiver<Option<ProbeResult>>;

/// Dispatcher with a process-local single-flight table.
pub struct ProbeDispatcher {
    store: UrlStore,
    bus: MonitorEventBus,
    http_prober: Arc<dyn Prober>,
    browser_prober: Arc<dyn Prober>,
    deadline: Duration,
    in_flight: DashMap<String, FlightReceiver>,
}

impl ProbeDispatcher {
    /// Wire the dispatcher with the engine probers.
    #[must_use]
    pub fn new(
        store: UrlStore,
        bus: MonitorEventBus,
        http_prober: HttpProber,
        browser_prober: BrowserProber,
        deadline: Duration,
    ) -> Arc<Self> {
        Self::with_probers(
            store,
            bus,
            Arc::new(http_prober),
            Arc::new(browser_prober),
            deadline,
        )
    }

    /// Full-control constructor; tests inject fake probers here.
    #[must_use]
    pub fn with_probers(
        store: UrlStore,
        bus: MonitorEventBus,
        http_prober: Arc<dyn Prober>,
        browser_prober: Arc<dyn Prober>,
        deadline: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            http_prober,
            browser_prober,
            deadline,
            in_flight: DashMap::new(),
        })
    }

    /// Number of probes currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Execute (or join) a probe for `url_id` and return its result.
    ///
    /// At most one probe per id runs at any instant: a concurrent call
    /// arriving while one is in flight awaits the same outcome and never
    /// schedules a second prober invocation.
    pub async fn dispatch(self: &Arc<Self>, url_id: &str) -> EngineResult<ProbeResult> {
        // Atomic check-or-insert: either adopt the existing flight's
        // receiver or publish our own slot under the same entry lock.
        let flight = match self.in_flight.entry(url_id.to_string()) {
            Entry::Occupied(entry) => Flight::Join(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Flight::Run(tx)
            }
        };

        match flight {
            Flight::Join(mut rx) => {
                debug!(url_id, "joining in-flight probe");
                let value = rx
                    .wait_for(|v| v.is_some())
                    .await
                    .map_err(|_| {
                        EngineError::Internal(format!("probe for {url_id} aborted before completing"))
                    })?;
                Ok((*value).clone().expect("guarded by wait_for"))
            }
            Flight::Run(tx) => {
                // Slot release must survive panics and early returns.
                let _slot = FlightSlot {
                    table: &self.in_flight,
                    url_id,
                };
                let result = self.run_probe(url_id).await;
                if let Ok(probe_result) = &result {
                    let _ = tx.send(Some(probe_result.clone()));
                }
                result
            }
        }
    }

    /// Dispatch every enabled entry without a concurrency cap; single-flight
    /// collapses overlap with any sweep already running.
    pub async fn dispatch_all(self: &Arc<Self>) -> EngineResult<Vec<ProbeResult>> {
        let entries = self
            .store
            .find_all(&UrlFilter { enabled: Some(true), ..UrlFilter::default() })
            .await?;

        let handles: Vec<_> = entries
            .iter()
            .map(|entry| {
                let dispatcher = Arc::clone(self);
                let id = entry.id.clone();
                tokio::spawn(async move { dispatcher.dispatch(&id).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => warn!(error = %e, "probe failed during check-all"),
                Err(e) => warn!(error = %e, "probe task panicked during check-all"),
            }
        }

        self.bus.publish(MonitorEvent::sync_complete(results.len()));
        Ok(results)
    }

    /// Wait until the in-flight table drains, bounded by `deadline`.
    /// Returns the number of probes still running at expiry.
    pub async fn drain(&self, deadline: Duration) -> usize {
        let waited = tokio::time::timeout(deadline, async {
            while !self.in_flight.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        if waited.is_err() {
            let remaining = self.in_flight.len();
            warn!(remaining, "dispatcher drain deadline expired");
            remaining
        } else {
            0
        }
    }

    async fn run_probe(&self, url_id: &str) -> EngineResult<ProbeResult> {
        let entry = self.store.find_by_id(url_id).await?;

        let (prober, deadline) = if entry.needs_browser() {
            (&self.browser_prober, self.deadline.max(BROWSER_DEADLINE_FLOOR))
        } else {
            (&self.http_prober, self.deadline)
        };

        debug!(url_id, url = %entry.url, browser = entry.needs_browser(), "probing");
        let outcome = match tokio::time::timeout(deadline, prober.probe(&entry, deadline)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Dropping the prober future cancels it; synthesize the
                // timeout the envelope promised.
                warn!(url_id, deadline_ms = deadline.as_millis() as u64, "probe envelope expired");
                ProbeOutcome::timed_out(deadline.as_millis() as u64)
            }
        };

        let mut status = classify(&outcome);
        // First successful probe of a new entry reports FRESH.
        if status == UrlStatus::Up && entry.history.is_empty() {
            status = UrlStatus::Fresh;
        }
        let details = error_details(&entry.url, status, &outcome);
        let mut result = ProbeResult::from_outcome(url_id, status, details, outcome);

        let persisted_against = self.persist_result(&entry, &mut result).await;

        // Emit regardless of persistence so live views are not starved.
        if let Some(old_status) = persisted_against
            && old_status != result.status
        {
            self.bus
                .publish(MonitorEvent::status_change(url_id, old_status, result.status));
        }
        self.bus.publish(MonitorEvent::update(result.clone()));

        Ok(result)
    }

    /// Persist through `append_history`, retrying version conflicts with
    /// exponential backoff. Returns the pre-write status when a write landed;
    /// `None` when persistence was dropped (deleted entry or retry
    /// exhaustion), in which case the result is tagged non-persisted.
    async fn persist_result(&self, entry: &MonitoredUrl, result: &mut ProbeResult) -> Option<UrlStatus> {
        let fields = StatusFields {
            status: result.status,
            latency_ms: Some(result.latency_ms),
            http_status: result.http_status,
            status_message: result
                .error_details
                .as_ref()
                .map(|d| d.summary.clone())
                .or_else(|| result.error_message.clone()),
        };

        let mut current = entry.clone();
        for attempt in 0..=PERSIST_RETRIES {
            match self
                .store
                .append_history(&current.id, result.latency_ms, &fields, current.version)
                .await
            {
                Ok(_) => {
                    let old_status = current.status;
                    if let Err(e) = self.store.record_probe(result).await {
                        warn!(url_id = %current.id, error = %e, "failed to record probe history row");
                    }
                    return Some(old_status);
                }
                Err(EngineError::VersionConflict { .. }) if attempt < PERSIST_RETRIES => {
                    let backoff = PERSIST_BACKOFF * 2u32.pow(attempt);
                    debug!(
                        url_id = %current.id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "version conflict persisting probe, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    match self.store.find_by_id(&current.id).await {
                        Ok(fresh) => current = fresh,
                        Err(EngineError::NotFound(_)) => {
                            // Entry removed mid-probe: persistence becomes a no-op.
                            info!(url_id = %current.id, "entry removed during probe, dropping persistence");
                            result.persisted = false;
                            return None;
                        }
                        Err(e) => {
                            warn!(url_id = %current.id, error = %e, "refetch failed, dropping probe persistence");
                            result.persisted = false;
                            return None;
                        }
                    }
                }
                Err(EngineError::VersionConflict { .. }) => {
                    // The next scheduled probe restores convergence.
                    warn!(
                        url_id = %current.id,
                        retries = PERSIST_RETRIES,
                        "version conflicts exhausted retries, dropping probe persistence"
                    );
                    result.persisted = false;
                    return None;
                }
                Err(EngineError::NotFound(_)) => {
                    info!(url_id = %current.id, "entry removed during probe, dropping persistence");
                    result.persisted = false;
                    return None;
                }
                Err(e) => {
                    warn!(url_id = %current.id, error = %e, "failed to persist probe result");
                    result.persisted = false;
                    return None;
                }
            }
        }
        result.persisted = false;
        None
    }
}

enum Flight {
    Join(FlightReceiver),
    Run(watch::Sender<Option<ProbeResult>>),
}

/// Removes the single-flight slot on drop, panic included.
struct FlightSlot<'a> {
    table: &'a DashMap<String, FlightReceiver>,
    url_id: &'a str,
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        self.table.remove(self.url_id);
    }
}
