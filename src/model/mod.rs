//! Registry and probe data shapes
//!
//! This module contains the stored registry entry (`MonitoredUrl`), its auth
//! configuration, and the raw/classified probe shapes exchanged between the
//! probers, the classifier, the store, and the push bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{ErrorDetails, UrlStatus};

/// Maximum accepted URL length in characters.
pub const MAX_URL_LEN: usize = 2048;

/// Minimum per-entry check interval.
pub const MIN_CHECK_INTERVAL_MS: u64 = 10_000;

/// Default per-entry check interval.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 60_000;

/// Generate a new 24-hex opaque id (12 random bytes, hex encoded).
#[must_use]
pub fn new_object_id() -> String {
    let bytes: [u8; 12] = rand::random();
    hex::encode(bytes)
}

/// Closed set of registry groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlGroup {
    Website,
    Api,
    Service,
    Database,
    Backend,
    Frontend,
    Iframe,
    Video,
    Game,
    Webgl,
}

/// Login flow shape for browser-login auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    /// Dedicated login page; credentials are entered after navigating there.
    Page,
    /// Login form opens in a modal on the target page itself.
    Modal,
}

/// Browser-login configuration: where to log in, how, and with what.
///
/// Selector fields are hints; when absent the prober falls back to an ordered
/// list of common selectors. `username` and `password` are required by
/// validation but optional here so update patches can omit them (omitted
/// secret = preserve existing).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserLoginConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(default)]
    pub login_type: LoginType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modal_trigger_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_success_selector: Option<String>,
}

impl Default for LoginType {
    fn default() -> Self {
        Self::Page
    }
}

/// Tagged auth configuration for a monitored URL.
///
/// Secret fields (`password`, `token`, `key`) are write-only: they are stored
/// but never serialized into read responses or push events; reads go through
/// [`AuthView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    Bearer {
        #[serde(default)]
        token: Option<String>,
    },
    ApiKey {
        header: String,
        #[serde(default)]
        key: Option<String>,
    },
    BrowserLogin(BrowserLoginConfig),
}

impl AuthConfig {
    /// Whether this auth config requires the headless-browser prober.
    #[must_use]
    pub fn needs_browser(&self) -> bool {
        matches!(self, Self::BrowserLogin(_))
    }

    /// Stable tag string matching the wire representation.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::ApiKey { .. } => "api_key",
            Self::BrowserLogin(_) => "browser_login",
        }
    }
}

/// Secret-free read view of an [`AuthConfig`].
///
/// This is the only auth shape that ever leaves the engine through read
/// APIs or push events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthView {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_type: Option<LoginType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_success_selector: Option<String>,
}

impl From<&AuthConfig> for AuthView {
    fn from(auth: &AuthConfig) -> Self {
        let mut view = Self {
            auth_type: auth.kind().to_string(),
            username: None,
            header: None,
            login_url: None,
            login_type: None,
            login_success_selector: None,
        };
        match auth {
            AuthConfig::None | AuthConfig::Bearer { .. } => {}
            AuthConfig::Basic { username, .. } => view.username = Some(username.clone()),
            AuthConfig::ApiKey { header, .. } => view.header = Some(header.clone()),
            AuthConfig::BrowserLogin(cfg) => {
                view.username = cfg.username.clone();
                view.login_url = cfg.login_url.clone();
                view.login_type = Some(cfg.login_type);
                view.login_success_selector = cfg.login_success_selector.clone();
            }
        }
        view
    }
}

/// One registered endpoint with its configuration and latest status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredUrl {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<UrlGroup>,
    pub enabled: bool,
    pub check_interval_ms: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Full auth config including secrets. Never serialized: read surfaces
    /// attach a secret-free [`AuthView`] instead, and the store writes this
    /// field through its own column.
    #[serde(skip_serializing, default)]
    pub auth: Option<AuthConfig>,
    pub status: UrlStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Last ≤ 20 latency samples, oldest → newest.
    #[serde(default)]
    pub history: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic counter for optimistic-concurrency writes.
    pub version: i64,
}

impl MonitoredUrl {
    /// Whether this entry's probes run through the headless browser.
    #[must_use]
    pub fn needs_browser(&self) -> bool {
        self.auth.as_ref().is_some_and(AuthConfig::needs_browser)
    }
}

/// Input shape for creating a registry entry. Field aliases keep the wire
/// names (`checkInterval`, `authCredentials`) stable for existing clients.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUrl {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group: Option<UrlGroup>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, alias = "checkInterval")]
    pub check_interval_ms: Option<u64>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub requires_auth: Option<bool>,
    #[serde(default, alias = "authCredentials", alias = "authConfig")]
    pub auth: Option<AuthConfig>,
}

/// Partial-update shape. `None` fields are untouched. Secret fields inside
/// `auth` follow the preserve/clear policy resolved by the registry service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPatch {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group: Option<UrlGroup>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, alias = "checkInterval")]
    pub check_interval_ms: Option<u64>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, alias = "authCredentials", alias = "authConfig")]
    pub auth: Option<AuthConfig>,
}

// =============================================================================
// Raw probe outcome (prober → classifier)
// =============================================================================

/// Transport-layer failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportError {
    Timeout,
    Dns,
    Connection,
    Tls,
    Other,
}

/// Error kind attached to a probe result for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeErrorKind {
    AuthFailed,
    Timeout,
    Network,
    Http,
    Script,
    Content,
}

/// Body-emptiness signals gathered by the browser prober. Field names stay
/// snake_case: this shape is produced verbatim by the inspection script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyContentCheck {
    /// `document.body.innerText.trim().length`
    pub text_length: u64,
    /// Count of visible non-script/style elements (capped at a small bound).
    pub visible_elements: u64,
}

impl EmptyContentCheck {
    /// A page is empty when it has no text AND fewer than 5 visible elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text_length == 0 && self.visible_elements < 5
    }
}

/// Per-iframe load signals. Cross-origin iframe contents are never accessed;
/// load success is inferred from src validity, connectedness, and layout box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub has_valid_src: bool,
    pub connected: bool,
    pub has_box: bool,
    pub loaded: bool,
}

/// Per-`<video>` readiness signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCheck {
    pub ready_state: i64,
    pub network_state: i64,
    pub has_source: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub playable: bool,
}

/// `HTMLMediaElement.networkState` value meaning "no usable source".
pub const NETWORK_STATE_NO_SOURCE: i64 = 3;

/// One captured console error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleErrorEntry {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
}

/// One failed network request observed during the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkErrorEntry {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub failure: String,
}

impl NetworkErrorEntry {
    /// Whether the failed request was a document/script/stylesheet, the
    /// resource classes whose loss degrades the page itself.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(
            self.resource_type.as_deref(),
            Some("Document" | "Script" | "Stylesheet")
        )
    }
}

/// Raw outcome of one probe, produced by either prober and consumed by the
/// classifier. HTTP probes populate only the transport/status fields; browser
/// probes attach the full inspection artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<TransportError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProbeErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_content: Option<EmptyContentCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iframe_checks: Vec<IframeCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_checks: Vec<VideoCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_errors: Vec<ConsoleErrorEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_errors: Vec<NetworkErrorEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    #[serde(default)]
    pub auth_attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_succeeded: Option<bool>,
}

impl ProbeOutcome {
    /// Outcome for a request that got an HTTP response.
    #[must_use]
    pub fn http(status: u16, latency_ms: u64, content_length: Option<u64>) -> Self {
        Self {
            http_status: Some(status),
            latency_ms,
            content_length,
            ..Self::default()
        }
    }

    /// Outcome for a transport-layer failure (no HTTP response).
    #[must_use]
    pub fn transport(kind: TransportError, message: impl Into<String>, latency_ms: u64) -> Self {
        let error_kind = match kind {
            TransportError::Timeout => ProbeErrorKind::Timeout,
            _ => ProbeErrorKind::Network,
        };
        Self {
            latency_ms,
            transport_error: Some(kind),
            error_kind: Some(error_kind),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Outcome for a probe whose deadline elapsed before completion.
    #[must_use]
    pub fn timed_out(latency_ms: u64) -> Self {
        Self::transport(TransportError::Timeout, "probe deadline exceeded", latency_ms)
    }

    /// Outcome for a browser probe whose login subroutine failed.
    #[must_use]
    pub fn auth_failed(message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            latency_ms,
            error_kind: Some(ProbeErrorKind::AuthFailed),
            error_message: Some(message.into()),
            auth_attempted: true,
            auth_succeeded: Some(false),
            ..Self::default()
        }
    }
}

// =============================================================================
// Classified probe result (dispatcher → store/bus)
// =============================================================================

/// The structured outcome of one probe after classification. This is the
/// shape persisted per probe and broadcast to push subscribers; it never
/// carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub url_id: String,
    pub status: UrlStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProbeErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_errors: Vec<ConsoleErrorEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_errors: Vec<NetworkErrorEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iframe_checks: Vec<IframeCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_checks: Vec<VideoCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    #[serde(default)]
    pub auth_attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_succeeded: Option<bool>,
    /// False when the store write was dropped after retry exhaustion; the
    /// event still reaches subscribers so the UI is not starved.
    #[serde(default = "default_true")]
    pub persisted: bool,
}

fn default_true() -> bool {
    true
}

impl ProbeResult {
    /// Build a result from a classified outcome.
    #[must_use]
    pub fn from_outcome(
        url_id: impl Into<String>,
        status: UrlStatus,
        details: Option<ErrorDetails>,
        outcome: ProbeOutcome,
    ) -> Self {
        Self {
            url_id: url_id.into(),
            status,
            http_status: outcome.http_status,
            latency_ms: outcome.latency_ms,
            content_length: outcome.content_length,
            error_kind: outcome.error_kind,
            error_message: outcome.error_message,
            error_details: details,
            checked_at: Utc::now(),
            console_errors: outcome.console_errors,
            network_errors: outcome.network_errors,
            iframe_checks: outcome.iframe_checks,
            video_checks: outcome.video_checks,
            screenshot_ref: outcome.screenshot_ref,
            auth_attempted: outcome.auth_attempted,
            auth_succeeded: outcome.auth_succeeded,
            persisted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_24_hex() {
        let id = new_object_id();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_object_id());
    }

    #[test]
    fn auth_view_drops_secrets() {
        let auth = AuthConfig::BrowserLogin(BrowserLoginConfig {
            login_url: Some("https://example.com/login".into()),
            login_type: LoginType::Modal,
            username: Some("probe@example.com".into()),
            password: Some("hunter2".into()),
            ..BrowserLoginConfig::default()
        });
        let view = AuthView::from(&auth);
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("browser_login"));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn empty_content_threshold() {
        assert!(EmptyContentCheck { text_length: 0, visible_elements: 4 }.is_empty());
        assert!(!EmptyContentCheck { text_length: 0, visible_elements: 5 }.is_empty());
        assert!(!EmptyContentCheck { text_length: 12, visible_elements: 0 }.is_empty());
    }

    #[test]
    fn critical_resource_types() {
        let mut entry = NetworkErrorEntry {
            url: "https://example.com/app.js".into(),
            method: Some("GET".into()),
            resource_type: Some("Script".into()),
            failure: "net::ERR_FAILED".into(),
        };
        assert!(entry.is_critical());
        entry.resource_type = Some("Image".into());
        assert!(!entry.is_critical());
        entry.resource_type = None;
        assert!(!entry.is_critical());
    }
}
