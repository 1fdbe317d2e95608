//! Broadcast bus for monitoring events
//!
//! Dispatcher and registry publish here; WebSocket sessions subscribe.
//! Publishing never blocks probe completion: a full subscriber buffer is the
//! subscriber's problem (the WS layer disconnects saturated peers), and an
//! event with no listeners is counted and dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Notify, broadcast};
use tracing::debug;

use super::errors::EventBusError;
use super::streaming::FilteredReceiver;
use super::types::MonitorEvent;

/// Default broadcast buffer capacity per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 1_024;

/// Shared state behind every clone of the bus.
#[derive(Debug)]
struct BusShared {
    published: AtomicU64,
    dropped: AtomicU64,
    peak_subscribers: AtomicUsize,
    shutdown: Notify,
    shutdown_flag: AtomicBool,
}

/// Consistent snapshot of bus counters.
#[derive(Debug, Clone, Copy)]
pub struct BusMetrics {
    pub events_published: u64,
    pub events_dropped: u64,
    pub active_subscribers: usize,
    pub peak_subscribers: usize,
}

/// Cloneable broadcast bus for [`MonitorEvent`]s.
#[derive(Debug, Clone)]
pub struct MonitorEventBus {
    sender: broadcast::Sender<MonitorEvent>,
    shared: Arc<BusShared>,
}

impl MonitorEventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            shared: Arc::new(BusShared {
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                peak_subscribers: AtomicUsize::new(0),
                shutdown: Notify::new(),
                shutdown_flag: AtomicBool::new(false),
            }),
        }
    }

    /// Publish an event to all subscribers. Never blocks.
    ///
    /// Returns the number of subscribers that received it. An event with no
    /// active subscribers is dropped and counted, not an error for callers;
    /// the engine keeps probing whether or not anyone is watching.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                self.shared.published.fetch_add(1, Ordering::Relaxed);
                self.note_subscriber_count(count);
                count
            }
            Err(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("published event with no active subscribers");
                0
            }
        }
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        let rx = self.sender.subscribe();
        self.note_subscriber_count(self.sender.receiver_count());
        rx
    }

    /// Subscribe through a predicate; only passing events are yielded.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&MonitorEvent) -> bool + Send + Sync + 'static,
    {
        FilteredReceiver::new(self.subscribe(), filter)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            events_published: self.shared.published.load(Ordering::Relaxed),
            events_dropped: self.shared.dropped.load(Ordering::Relaxed),
            active_subscribers: self.sender.receiver_count(),
            peak_subscribers: self.shared.peak_subscribers.load(Ordering::Relaxed),
        }
    }

    /// Signal shutdown to all waiters. Idempotent; shared across clones.
    pub fn shutdown(&self) {
        self.shared.shutdown_flag.store(true, Ordering::SeqCst);
        self.shared.shutdown.notify_waiters();
        debug!("event bus shutdown signaled");
    }

    /// Wait for the shutdown signal. Intended for `tokio::select!` arms in
    /// subscriber loops.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown() {
            return;
        }
        self.shared.shutdown.notified().await;
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown_flag.load(Ordering::SeqCst)
    }

    fn note_subscriber_count(&self, count: usize) {
        self.shared.peak_subscribers.fetch_max(count, Ordering::Relaxed);
    }
}

impl Default for MonitorEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::UrlStatus;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = MonitorEventBus::default();
        let mut rx = bus.subscribe();

        let delivered = bus.publish(MonitorEvent::status_change("abc", UrlStatus::Up, UrlStatus::Down));
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            MonitorEvent::StatusChange { url_id, old_status, new_status, .. } => {
                assert_eq!(url_id, "abc");
                assert_eq!(old_status, UrlStatus::Up);
                assert_eq!(new_status, UrlStatus::Down);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_counted() {
        let bus = MonitorEventBus::default();
        assert_eq!(bus.publish(MonitorEvent::sync_complete(3)), 0);
        let metrics = bus.metrics();
        assert_eq!(metrics.events_dropped, 1);
        assert_eq!(metrics.events_published, 0);
    }

    #[tokio::test]
    async fn shutdown_wakes_waiters() {
        let bus = MonitorEventBus::default();
        let waiter = bus.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown().await });
        bus.shutdown();
        handle.await.unwrap();
        assert!(bus.is_shutdown());
    }

    #[tokio::test]
    async fn error_variants_format() {
        assert_eq!(EventBusError::NoSubscribers.to_string(), "No active subscribers");
        assert_eq!(
            EventBusError::ReceiverLagged(7).to_string(),
            "Receiver lagged behind, missed 7 messages"
        );
    }
}
