//! Event type definitions for the monitoring push bus
//!
//! Engine-side events published by the dispatcher and registry. The
//! WebSocket layer wraps these into client-facing envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::UrlStatus;
use crate::model::ProbeResult;

/// Events fanned out to live subscribers. The serialized form doubles as the
/// WebSocket envelope for these three message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MonitorEvent {
    /// One classified probe result. Emitted per completed probe.
    MonitoringUpdate { data: Box<ProbeResult> },
    /// The classified status of an entry changed.
    StatusChange {
        url_id: String,
        old_status: UrlStatus,
        new_status: UrlStatus,
        timestamp: DateTime<Utc>,
    },
    /// A bulk registry change finished (import, check-all, removal sweep).
    SyncComplete {
        total: usize,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Create a `MonitoringUpdate` event.
    #[must_use]
    pub fn update(result: ProbeResult) -> Self {
        Self::MonitoringUpdate { data: Box::new(result) }
    }

    /// Create a `StatusChange` event.
    #[must_use]
    pub fn status_change(url_id: impl Into<String>, old: UrlStatus, new: UrlStatus) -> Self {
        Self::StatusChange {
            url_id: url_id.into(),
            old_status: old,
            new_status: new,
            timestamp: Utc::now(),
        }
    }

    /// Create a `SyncComplete` event.
    #[must_use]
    pub fn sync_complete(total: usize) -> Self {
        Self::SyncComplete { total, timestamp: Utc::now() }
    }

    /// The URL id this event is about, when it targets a single entry.
    /// Subscription filters match on this; `None` means "broadcast to all".
    #[must_use]
    pub fn url_id(&self) -> Option<&str> {
        match self {
            Self::MonitoringUpdate { data } => Some(&data.url_id),
            Self::StatusChange { url_id, .. } => Some(url_id),
            Self::SyncComplete { .. } => None,
        }
    }
}
