//! Probe outcome classification
//!
//! Maps a raw [`ProbeOutcome`](crate::model::ProbeOutcome) onto the closed
//! status taxonomy and builds the structured error-details record consumed by
//! downstream UIs. Classification is a pure, total function: every valid
//! outcome yields exactly one status.

use serde::{Deserialize, Serialize};

use crate::model::{ProbeErrorKind, ProbeOutcome, TransportError, NETWORK_STATE_NO_SOURCE};

/// Latency above which an otherwise-healthy probe is downgraded to WARNING.
pub const SLOW_LATENCY_THRESHOLD_MS: u64 = 5_000;

/// Closed status taxonomy for a monitored URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlStatus {
    /// First successful probe of a newly added entry.
    Fresh,
    /// Healthy and stable.
    Up,
    /// Degraded: client-side HTTP error or slow response.
    Warning,
    /// Server error, auth failure, or otherwise unreachable service.
    Down,
    /// The probe deadline elapsed before a response.
    Timeout,
    /// Page rendered with no meaningful content.
    Empty,
    /// Some embedded content or critical resources failed to load.
    Partial,
    /// A media element on the page cannot play.
    NotPlayable,
    /// Every iframe on the page failed to load.
    IframeFailed,
    /// Console errors with no stronger signal.
    JsError,
    /// DNS/connection/TLS failure at the transport layer.
    NetworkError,
}

impl UrlStatus {
    /// Whether this status represents a successful probe.
    #[must_use]
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Fresh | Self::Up)
    }

    /// Wire string, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "FRESH",
            Self::Up => "UP",
            Self::Warning => "WARNING",
            Self::Down => "DOWN",
            Self::Timeout => "TIMEOUT",
            Self::Empty => "EMPTY",
            Self::Partial => "PARTIAL",
            Self::NotPlayable => "NOT_PLAYABLE",
            Self::IframeFailed => "IFRAME_FAILED",
            Self::JsError => "JS_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
        }
    }
}

impl std::str::FromStr for UrlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FRESH" => Ok(Self::Fresh),
            "UP" => Ok(Self::Up),
            "WARNING" => Ok(Self::Warning),
            "DOWN" => Ok(Self::Down),
            "TIMEOUT" => Ok(Self::Timeout),
            "EMPTY" => Ok(Self::Empty),
            "PARTIAL" => Ok(Self::Partial),
            "NOT_PLAYABLE" => Ok(Self::NotPlayable),
            "IFRAME_FAILED" => Ok(Self::IframeFailed),
            "JS_ERROR" => Ok(Self::JsError),
            "NETWORK_ERROR" => Ok(Self::NetworkError),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl std::fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured, human-readable failure explanation attached to non-UP results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// One-line description of what went wrong.
    pub summary: String,
    /// Where the failure was observed (URL, resource, or page area).
    pub location: String,
    /// Why it happened, as far as the raw signals allow.
    pub reason: String,
    /// What an operator should look at first.
    pub recommendation: String,
}

/// Console-message tokens that point at a media/player failure rather than a
/// generic script error.
const MEDIA_ERROR_TOKENS: &[&str] = &[
    "video", "media", "player", "playback", "hls", "dash", "codec", "webgl",
];

/// Classify a raw probe outcome into the status taxonomy.
///
/// Rules are evaluated in order; the first match wins. The FRESH substitution
/// for first-ever successes is the dispatcher's responsibility; this
/// function never returns [`UrlStatus::Fresh`].
#[must_use]
pub fn classify(outcome: &ProbeOutcome) -> UrlStatus {
    // Login failures precede everything else: the target was never probed.
    if outcome.error_kind == Some(ProbeErrorKind::AuthFailed) {
        return UrlStatus::Down;
    }

    // Rules 1-2: transport layer.
    match outcome.transport_error {
        Some(TransportError::Timeout) => return UrlStatus::Timeout,
        Some(
            TransportError::Dns | TransportError::Connection | TransportError::Tls
            | TransportError::Other,
        ) => return UrlStatus::NetworkError,
        None => {}
    }

    // Rules 3-4: HTTP status bands.
    if let Some(status) = outcome.http_status {
        if status >= 500 {
            return UrlStatus::Down;
        }
        if (400..500).contains(&status) {
            return UrlStatus::Warning;
        }
    }

    // Rule 5: empty page body.
    if outcome.empty_content.is_some_and(|c| c.is_empty()) {
        return UrlStatus::Empty;
    }

    // Rule 6: iframe load failures.
    if !outcome.iframe_checks.is_empty() {
        let failed = outcome.iframe_checks.iter().filter(|f| !f.loaded).count();
        if failed == outcome.iframe_checks.len() && failed > 0 {
            return UrlStatus::IframeFailed;
        }
        if failed > 0 {
            return UrlStatus::Partial;
        }
    }

    // Rule 7: unplayable media.
    if outcome.video_checks.iter().any(|v| !v.playable) {
        return UrlStatus::NotPlayable;
    }

    // Rule 8: critical resource failures.
    if outcome.network_errors.iter().any(|e| e.is_critical()) {
        return UrlStatus::Partial;
    }

    // Rule 9: console errors. Media-flavored errors on an otherwise-healthy
    // page point at a broken player rather than generic script breakage.
    if !outcome.console_errors.is_empty() {
        let media_flavored = outcome.console_errors.iter().any(|e| {
            let lower = e.message.to_lowercase();
            MEDIA_ERROR_TOKENS.iter().any(|t| lower.contains(t))
        });
        if media_flavored {
            return UrlStatus::NotPlayable;
        }
        return UrlStatus::JsError;
    }

    // Rule 10: slow but working.
    if outcome.latency_ms > SLOW_LATENCY_THRESHOLD_MS {
        return UrlStatus::Warning;
    }

    UrlStatus::Up
}

/// Build the structured error details for a classified outcome, or `None`
/// when the probe was healthy.
#[must_use]
pub fn error_details(url: &str, status: UrlStatus, outcome: &ProbeOutcome) -> Option<ErrorDetails> {
    if status.is_healthy() {
        return None;
    }

    if outcome.error_kind == Some(ProbeErrorKind::AuthFailed) {
        return Some(ErrorDetails {
            summary: "Login failed".into(),
            location: url.into(),
            reason: outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "credentials were rejected or the login form was not found".into()),
            recommendation: "Verify the stored credentials and login selectors.".into(),
        });
    }

    if let Some(code) = outcome.http_status
        && code >= 400
    {
        let (reason, recommendation) = http_code_explanation(code)
            .unwrap_or(("The server returned an error status.", "Inspect the server logs."));
        return Some(ErrorDetails {
            summary: format!("HTTP {code}"),
            location: url.into(),
            reason: reason.into(),
            recommendation: recommendation.into(),
        });
    }

    let details = match status {
        UrlStatus::Timeout => ErrorDetails {
            summary: "Request timed out".into(),
            location: url.into(),
            reason: "No response arrived within the probe deadline.".into(),
            recommendation: "Check server load and network path; consider a longer check interval."
                .into(),
        },
        UrlStatus::NetworkError => ErrorDetails {
            summary: "Network error".into(),
            location: url.into(),
            reason: outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "DNS, connection, or TLS negotiation failed.".into()),
            recommendation: "Verify DNS records, firewall rules, and the TLS certificate.".into(),
        },
        UrlStatus::Empty => ErrorDetails {
            summary: "Page rendered empty".into(),
            location: url.into(),
            reason: "The document body has no text and almost no visible elements.".into(),
            recommendation: "Check client-side rendering errors and API responses feeding the page."
                .into(),
        },
        UrlStatus::IframeFailed => ErrorDetails {
            summary: "Embedded frames failed".into(),
            location: first_failed_iframe(outcome).unwrap_or_else(|| url.into()),
            reason: "Every iframe on the page failed to load.".into(),
            recommendation: "Verify the embedded origin is up and allows framing.".into(),
        },
        UrlStatus::Partial => ErrorDetails {
            summary: "Partially loaded".into(),
            location: outcome
                .network_errors
                .iter()
                .find(|e| e.is_critical())
                .map_or_else(|| first_failed_iframe(outcome).unwrap_or_else(|| url.into()),
                    |e| e.url.clone()),
            reason: "Some embedded content or critical resources failed to load.".into(),
            recommendation: "Check the failed resource URLs for availability and CORS.".into(),
        },
        UrlStatus::NotPlayable => ErrorDetails {
            summary: "Media not playable".into(),
            location: url.into(),
            reason: outcome
                .video_checks
                .iter()
                .find_map(|v| v.error_message.clone())
                .unwrap_or_else(|| "A media element has no playable source.".into()),
            recommendation: "Verify the stream/source URL and codec support.".into(),
        },
        UrlStatus::JsError => ErrorDetails {
            summary: "Script errors on page".into(),
            location: outcome
                .console_errors
                .first()
                .and_then(|e| e.source.clone())
                .unwrap_or_else(|| url.into()),
            reason: outcome
                .console_errors
                .first()
                .map_or_else(|| "Console reported errors.".into(), |e| e.message.clone()),
            recommendation: "Open the page with devtools and fix the reported exceptions.".into(),
        },
        UrlStatus::Warning => ErrorDetails {
            summary: "Slow response".into(),
            location: url.into(),
            reason: format!("Response took {} ms.", outcome.latency_ms),
            recommendation: "Investigate backend latency and upstream dependencies.".into(),
        },
        UrlStatus::Down => ErrorDetails {
            summary: "Endpoint down".into(),
            location: url.into(),
            reason: outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "The endpoint is not serving successful responses.".into()),
            recommendation: "Check the service process and its upstreams.".into(),
        },
        UrlStatus::Fresh | UrlStatus::Up => return None,
    };
    Some(details)
}

fn first_failed_iframe(outcome: &ProbeOutcome) -> Option<String> {
    outcome
        .iframe_checks
        .iter()
        .find(|f| !f.loaded)
        .and_then(|f| f.src.clone())
}

/// Reason/recommendation pairs for the HTTP codes surfaced to downstream UIs.
#[must_use]
pub fn http_code_explanation(code: u16) -> Option<(&'static str, &'static str)> {
    let pair = match code {
        400 => (
            "Bad Request: the server could not understand the request.",
            "Check the URL for malformed query parameters.",
        ),
        401 => (
            "Unauthorized: authentication is required or the credentials were rejected.",
            "Verify the configured auth credentials.",
        ),
        403 => (
            "Forbidden: the server refuses to authorize the request.",
            "Check access rules, IP allowlists, and tokens.",
        ),
        404 => (
            "Not Found: the resource does not exist at this URL.",
            "Confirm the path is still valid or update the monitored URL.",
        ),
        405 => (
            "Method Not Allowed: the endpoint rejects this HTTP method.",
            "The prober already falls back to GET; check server method routing.",
        ),
        408 => (
            "Request Timeout: the server gave up waiting for the request.",
            "Investigate connection stability between prober and server.",
        ),
        410 => (
            "Gone: the resource was intentionally removed.",
            "Remove or update this monitored URL.",
        ),
        429 => (
            "Too Many Requests: the server is rate limiting.",
            "Increase the check interval for this entry.",
        ),
        500 => (
            "Internal Server Error: the application crashed while handling the request.",
            "Inspect application logs around the probe timestamp.",
        ),
        502 => (
            "Bad Gateway: an upstream returned an invalid response.",
            "Check the reverse proxy and its upstream health.",
        ),
        503 => (
            "Service Unavailable: the server cannot handle requests right now.",
            "Check for overload, maintenance mode, or crashed workers.",
        ),
        504 => (
            "Gateway Timeout: an upstream did not respond in time.",
            "Check upstream latency and proxy timeout settings.",
        ),
        508 => (
            "Loop Detected: the server aborted an infinite internal loop.",
            "Inspect rewrite/redirect rules for cycles.",
        ),
        521 => (
            "Web Server Is Down: the edge could not reach the origin.",
            "Check that the origin server process is running and reachable.",
        ),
        _ => return None,
    };
    Some(pair)
}

/// Derive playability per the media rule: a video is playable when it has
/// buffered enough data, has a source, and reports no error.
#[must_use]
pub fn video_playable(ready_state: i64, network_state: i64, has_source: bool, error_code: Option<i64>) -> bool {
    ready_state >= 2
        && network_state != NETWORK_STATE_NO_SOURCE
        && error_code.is_none()
        && has_source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ConsoleErrorEntry, EmptyContentCheck, IframeCheck, NetworkErrorEntry, VideoCheck,
    };

    fn healthy(latency_ms: u64) -> ProbeOutcome {
        ProbeOutcome::http(200, latency_ms, None)
    }

    #[test]
    fn transport_timeout_wins() {
        let outcome = ProbeOutcome::transport(TransportError::Timeout, "deadline", 35_000);
        assert_eq!(classify(&outcome), UrlStatus::Timeout);
    }

    #[test]
    fn transport_errors_map_to_network_error() {
        for kind in [
            TransportError::Dns,
            TransportError::Connection,
            TransportError::Tls,
            TransportError::Other,
        ] {
            let outcome = ProbeOutcome::transport(kind, "boom", 12);
            assert_eq!(classify(&outcome), UrlStatus::NetworkError, "{kind:?}");
        }
    }

    #[test]
    fn http_bands() {
        assert_eq!(classify(&ProbeOutcome::http(503, 80, None)), UrlStatus::Down);
        assert_eq!(classify(&ProbeOutcome::http(500, 80, None)), UrlStatus::Down);
        assert_eq!(classify(&ProbeOutcome::http(404, 80, None)), UrlStatus::Warning);
        assert_eq!(classify(&ProbeOutcome::http(400, 80, None)), UrlStatus::Warning);
        assert_eq!(classify(&ProbeOutcome::http(200, 80, None)), UrlStatus::Up);
        assert_eq!(classify(&ProbeOutcome::http(301, 80, None)), UrlStatus::Up);
    }

    #[test]
    fn empty_body_detected() {
        let mut outcome = healthy(100);
        outcome.empty_content = Some(EmptyContentCheck { text_length: 0, visible_elements: 2 });
        assert_eq!(classify(&outcome), UrlStatus::Empty);
    }

    fn iframe(loaded: bool) -> IframeCheck {
        IframeCheck {
            src: Some("https://embed.example.com".into()),
            has_valid_src: true,
            connected: true,
            has_box: loaded,
            loaded,
        }
    }

    #[test]
    fn all_iframes_failed() {
        let mut outcome = healthy(100);
        outcome.iframe_checks = vec![iframe(false), iframe(false)];
        assert_eq!(classify(&outcome), UrlStatus::IframeFailed);
    }

    #[test]
    fn some_iframes_failed_is_partial() {
        let mut outcome = healthy(100);
        outcome.iframe_checks = vec![iframe(true), iframe(false)];
        assert_eq!(classify(&outcome), UrlStatus::Partial);
    }

    #[test]
    fn unplayable_video() {
        let mut outcome = healthy(100);
        outcome.video_checks = vec![VideoCheck {
            ready_state: 0,
            network_state: 3,
            has_source: false,
            error_code: None,
            error_message: None,
            playable: false,
        }];
        assert_eq!(classify(&outcome), UrlStatus::NotPlayable);
    }

    #[test]
    fn critical_resource_failure_is_partial() {
        let mut outcome = healthy(100);
        outcome.network_errors = vec![NetworkErrorEntry {
            url: "https://example.com/app.css".into(),
            method: Some("GET".into()),
            resource_type: Some("Stylesheet".into()),
            failure: "net::ERR_ABORTED".into(),
        }];
        assert_eq!(classify(&outcome), UrlStatus::Partial);
    }

    #[test]
    fn console_errors_split_by_media_tokens() {
        let mut outcome = healthy(100);
        outcome.console_errors = vec![ConsoleErrorEntry {
            message: "Uncaught TypeError: x is undefined".into(),
            source: Some("app.js".into()),
            line: Some(10),
            column: Some(4),
        }];
        assert_eq!(classify(&outcome), UrlStatus::JsError);

        outcome.console_errors[0].message = "HLS player failed to attach media".into();
        assert_eq!(classify(&outcome), UrlStatus::NotPlayable);
    }

    #[test]
    fn slow_response_is_warning() {
        assert_eq!(classify(&healthy(5_400)), UrlStatus::Warning);
        assert_eq!(classify(&healthy(5_000)), UrlStatus::Up);
    }

    #[test]
    fn auth_failure_is_down() {
        let outcome = ProbeOutcome::auth_failed("bad credentials", 900);
        assert_eq!(classify(&outcome), UrlStatus::Down);
        let details = error_details("https://example.com", UrlStatus::Down, &outcome).unwrap();
        assert_eq!(details.summary, "Login failed");
    }

    #[test]
    fn service_unavailable_details() {
        let outcome = ProbeOutcome::http(503, 80, None);
        let details = error_details("https://example.com", UrlStatus::Down, &outcome).unwrap();
        assert!(details.reason.contains("Service Unavailable"));
    }

    #[test]
    fn explanation_table_covers_known_codes() {
        for code in [400, 401, 403, 404, 405, 408, 410, 429, 500, 502, 503, 504, 508, 521] {
            assert!(http_code_explanation(code).is_some(), "missing explanation for {code}");
        }
        assert!(http_code_explanation(418).is_none());
    }

    #[test]
    fn healthy_outcomes_have_no_details() {
        assert!(error_details("https://example.com", UrlStatus::Up, &healthy(100)).is_none());
    }

    mod totality {
        use super::*;
        use proptest::prelude::*;

        fn arb_transport() -> impl Strategy<Value = Option<TransportError>> {
            prop_oneof![
                Just(None),
                Just(Some(TransportError::Timeout)),
                Just(Some(TransportError::Dns)),
                Just(Some(TransportError::Connection)),
                Just(Some(TransportError::Tls)),
                Just(Some(TransportError::Other)),
            ]
        }

        proptest! {
            // Every raw outcome classifies to some status without panicking,
            // and never to FRESH (the dispatcher owns that substitution).
            #[test]
            fn classify_is_total(
                status in proptest::option::of(100u16..600),
                latency in 0u64..120_000,
                transport in arb_transport(),
                text_len in 0u64..500,
                visible in 0u64..10,
                iframes_loaded in proptest::collection::vec(any::<bool>(), 0..4),
                console_errors in 0usize..3,
            ) {
                let outcome = ProbeOutcome {
                    http_status: status,
                    latency_ms: latency,
                    transport_error: transport,
                    empty_content: Some(EmptyContentCheck {
                        text_length: text_len,
                        visible_elements: visible,
                    }),
                    iframe_checks: iframes_loaded
                        .into_iter()
                        .map(|loaded| IframeCheck {
                            src: None,
                            has_valid_src: loaded,
                            connected: loaded,
                            has_box: loaded,
                            loaded,
                        })
                        .collect(),
                    console_errors: (0..console_errors)
                        .map(|i| ConsoleErrorEntry {
                            message: format!("error {i}"),
                            source: None,
                            line: None,
                            column: None,
                        })
                        .collect(),
                    ..ProbeOutcome::default()
                };
                let classified = classify(&outcome);
                prop_assert_ne!(classified, UrlStatus::Fresh);
                // Round-trips through the wire form.
                prop_assert_eq!(classified.as_str().parse::<UrlStatus>().unwrap(), classified);
            }
        }
    }
}
