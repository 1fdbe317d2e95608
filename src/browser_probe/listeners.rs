//! CDP event collection for a probe page
//!
//! Attaches console/exception and network listeners to a page and exposes the
//! captured diagnostics plus a best-effort network-idle wait built on the
//! observed in-flight request count.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    ResourceType,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::model::{ConsoleErrorEntry, NetworkErrorEntry};

/// The network is considered idle after this quiet period.
const NETWORK_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Poll cadence of the idle wait.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Default)]
struct Captured {
    console_errors: Vec<ConsoleErrorEntry>,
    network_errors: Vec<NetworkErrorEntry>,
    /// request id → (url, method, resource type) for failure correlation.
    requests: HashMap<String, (String, String, Option<String>)>,
    document_status: Option<u16>,
}

/// Listener set attached to one probe page. Collection tasks are aborted on
/// drop so a closed page never leaks pollers.
pub struct ProbeListeners {
    captured: Arc<Mutex<Captured>>,
    pending_requests: Arc<AtomicI64>,
    last_activity: Arc<Mutex<Instant>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProbeListeners {
    /// Attach console, exception, and network listeners to the page.
    pub async fn attach(page: &Page) -> Result<Self> {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let pending_requests = Arc::new(AtomicI64::new(0));
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let mut tasks = Vec::with_capacity(6);

        // Console errors.
        {
            let mut events = page.event_listener::<EventConsoleApiCalled>().await?;
            let captured = Arc::clone(&captured);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if event.r#type != ConsoleApiCalledType::Error {
                        continue;
                    }
                    let entry = console_entry_from_event(&event);
                    captured.lock().console_errors.push(entry);
                }
            }));
        }

        // Uncaught exceptions surface as console errors too.
        {
            let mut events = page.event_listener::<EventExceptionThrown>().await?;
            let captured = Arc::clone(&captured);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let details = &event.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|e| e.description.clone())
                        .unwrap_or_else(|| details.text.clone());
                    captured.lock().console_errors.push(ConsoleErrorEntry {
                        message,
                        source: details.url.clone(),
                        line: Some(details.line_number as u64),
                        column: Some(details.column_number as u64),
                    });
                }
            }));
        }

        // Outgoing requests: track identity and the in-flight count.
        {
            let mut events = page.event_listener::<EventRequestWillBeSent>().await?;
            let captured = Arc::clone(&captured);
            let pending = Arc::clone(&pending_requests);
            let activity = Arc::clone(&last_activity);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    pending.fetch_add(1, Ordering::Relaxed);
                    *activity.lock() = Instant::now();
                    captured.lock().requests.insert(
                        event.request_id.inner().clone(),
                        (
                            event.request.url.clone(),
                            event.request.method.clone(),
                            event.r#type.as_ref().map(resource_type_name),
                        ),
                    );
                }
            }));
        }

        // Completions.
        {
            let mut events = page.event_listener::<EventLoadingFinished>().await?;
            let pending = Arc::clone(&pending_requests);
            let activity = Arc::clone(&last_activity);
            tasks.push(tokio::spawn(async move {
                while let Some(_event) = events.next().await {
                    pending.fetch_sub(1, Ordering::Relaxed);
                    *activity.lock() = Instant::now();
                }
            }));
        }

        // Failures become diagnostics unless the request was canceled (a
        // canceled fetch during navigation is routine, not a fault).
        {
            let mut events = page.event_listener::<EventLoadingFailed>().await?;
            let captured = Arc::clone(&captured);
            let pending = Arc::clone(&pending_requests);
            let activity = Arc::clone(&last_activity);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    pending.fetch_sub(1, Ordering::Relaxed);
                    *activity.lock() = Instant::now();
                    if event.canceled == Some(true) {
                        continue;
                    }
                    let mut captured = captured.lock();
                    let (url, method, mapped_type) = captured
                        .requests
                        .get(event.request_id.inner())
                        .cloned()
                        .unwrap_or_else(|| (String::from("<unknown>"), String::from("GET"), None));
                    // The failure event's type can degrade to Other; prefer
                    // the type recorded when the request went out.
                    let resource_type = match event.r#type {
                        ResourceType::Other => mapped_type.or_else(|| Some("Other".into())),
                        ref t => Some(resource_type_name(t)),
                    };
                    captured.network_errors.push(NetworkErrorEntry {
                        url,
                        method: Some(method),
                        resource_type,
                        failure: event.error_text.clone(),
                    });
                }
            }));
        }

        // Document responses carry the page's HTTP status.
        {
            let mut events = page.event_listener::<EventResponseReceived>().await?;
            let captured = Arc::clone(&captured);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if event.r#type == ResourceType::Document {
                        captured.lock().document_status = Some(event.response.status as u16);
                    }
                }
            }));
        }

        Ok(Self {
            captured,
            pending_requests,
            last_activity,
            tasks,
        })
    }

    /// Snapshot of captured console errors.
    #[must_use]
    pub fn console_errors(&self) -> Vec<ConsoleErrorEntry> {
        self.captured.lock().console_errors.clone()
    }

    /// Snapshot of captured network failures.
    #[must_use]
    pub fn network_errors(&self) -> Vec<NetworkErrorEntry> {
        self.captured.lock().network_errors.clone()
    }

    /// HTTP status of the last document response, when one was observed.
    #[must_use]
    pub fn document_status(&self) -> Option<u16> {
        self.captured.lock().document_status
    }

    /// Wait until no requests have been in flight for a short quiet period,
    /// bounded by `ceiling`. Hitting the ceiling is not an error: pages with
    /// long-polling or sockets simply never go quiet.
    pub async fn wait_for_network_idle(&self, ceiling: Duration) {
        let deadline = Instant::now() + ceiling;
        loop {
            let pending = self.pending_requests.load(Ordering::Relaxed);
            let quiet_for = self.last_activity.lock().elapsed();
            if pending <= 0 && quiet_for >= NETWORK_QUIET_PERIOD {
                return;
            }
            if Instant::now() >= deadline {
                debug!(pending, "network idle wait hit its ceiling, continuing");
                return;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}

impl Drop for ProbeListeners {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn console_entry_from_event(event: &EventConsoleApiCalled) -> ConsoleErrorEntry {
    let message = event
        .args
        .iter()
        .filter_map(|arg| match &arg.value {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => arg.description.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ");

    let frame = event
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first());

    ConsoleErrorEntry {
        message,
        source: frame.map(|f| f.url.clone()).filter(|u| !u.is_empty()),
        line: frame.map(|f| f.line_number as u64),
        column: frame.map(|f| f.column_number as u64),
    }
}

fn resource_type_name(resource_type: &ResourceType) -> String {
    format!("{resource_type:?}")
}
