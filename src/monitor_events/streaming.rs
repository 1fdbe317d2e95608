//! Filtered event receivers
//!
//! Wraps a broadcast receiver with a predicate so subscribers only see the
//! events they asked for. The WebSocket layer uses this with a closure over
//! the connection's live url-id filter.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::errors::EventBusError;
use super::types::MonitorEvent;

/// Filtered event receiver wrapper
pub struct FilteredReceiver<F>
where
    F: Fn(&MonitorEvent) -> bool + Send + Sync + 'static,
{
    receiver: broadcast::Receiver<MonitorEvent>,
    filter: Arc<F>,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&MonitorEvent) -> bool + Send + Sync + 'static,
{
    pub fn new(receiver: broadcast::Receiver<MonitorEvent>, filter: F) -> Self {
        Self {
            receiver,
            filter: Arc::new(filter),
        }
    }

    /// Receive the next event that passes the filter. Buffered non-matching
    /// events are skipped, never lost to other subscribers.
    pub async fn recv(&mut self) -> Result<MonitorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::Shutdown);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(EventBusError::ReceiverLagged(skipped));
                }
            }
        }
    }

    /// Non-blocking variant; drains buffered events until one matches.
    pub fn try_recv(&mut self) -> Result<Option<MonitorEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::Shutdown);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(EventBusError::ReceiverLagged(skipped));
                }
            }
        }
    }

    /// Whether a given event would pass this receiver's filter.
    #[must_use]
    pub fn would_receive(&self, event: &MonitorEvent) -> bool {
        (self.filter)(event)
    }
}
