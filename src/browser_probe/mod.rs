//! Headless-browser prober
//!
//! Deep inspection of a monitored URL: a fresh page on the shared browser,
//! optional programmatic login, navigation with the probe deadline, console
//! and network capture, and DOM checks for empty content, iframes, and media
//! elements. Failing probes attach a viewport screenshot.

pub mod js_scripts;
pub mod launch;
pub mod listeners;
pub mod login;
pub mod supervisor;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use tracing::{debug, warn};

use crate::classifier::{classify, video_playable};
use crate::model::{
    BrowserLoginConfig, EmptyContentCheck, IframeCheck, ProbeOutcome, TransportError, VideoCheck,
};
use listeners::ProbeListeners;
use login::{run_login, LoginVerdict};
pub use supervisor::BrowserSupervisor;

/// Ceiling on the post-navigation network-idle wait.
const NETWORK_IDLE_CEILING: Duration = Duration::from_secs(30);

/// Raw video signals as returned by the inspection script; playability is
/// derived on this side so the rule lives next to the classifier.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVideoCheck {
    ready_state: i64,
    network_state: i64,
    has_source: bool,
    error_code: Option<i64>,
    error_message: Option<String>,
}

/// Prober driving the shared headless browser.
#[derive(Clone)]
pub struct BrowserProber {
    supervisor: BrowserSupervisor,
    screenshot_dir: PathBuf,
}

impl BrowserProber {
    #[must_use]
    pub fn new(supervisor: BrowserSupervisor, screenshot_dir: PathBuf) -> Self {
        Self {
            supervisor,
            screenshot_dir,
        }
    }

    #[must_use]
    pub fn supervisor(&self) -> &BrowserSupervisor {
        &self.supervisor
    }

    /// Probe `url`, logging in first when a browser-login config is present.
    ///
    /// Never returns an error: every failure mode is folded into a
    /// [`ProbeOutcome`] for classification.
    pub async fn probe(
        &self,
        url: &str,
        login_config: Option<&BrowserLoginConfig>,
        timeout: Duration,
    ) -> ProbeOutcome {
        let started = Instant::now();

        let browser = match self.supervisor.acquire().await {
            Ok(browser) => browser,
            Err(e) => {
                warn!(url, error = %e, "browser unavailable for probe");
                return ProbeOutcome::transport(
                    TransportError::Other,
                    format!("browser unavailable: {e}"),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                warn!(url, error = %e, "failed to open probe page");
                return ProbeOutcome::transport(
                    TransportError::Other,
                    format!("failed to open page: {e}"),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let mut outcome = self
            .probe_on_page(&page, url, login_config, timeout, started)
            .await;
        outcome.latency_ms = started.elapsed().as_millis() as u64;

        // Screenshots only for probes an operator will want to look at.
        if classify(&outcome) != crate::classifier::UrlStatus::Up {
            outcome.screenshot_ref = self.capture_screenshot(&page, url).await;
        }

        if let Err(e) = page.close().await {
            debug!(url, error = %e, "failed to close probe page");
        }
        self.supervisor.touch().await;
        outcome
    }

    async fn probe_on_page(
        &self,
        page: &Page,
        url: &str,
        login_config: Option<&BrowserLoginConfig>,
        timeout: Duration,
        started: Instant,
    ) -> ProbeOutcome {
        let listeners = match ProbeListeners::attach(page).await {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!(url, error = %e, "failed to attach page listeners");
                return ProbeOutcome::transport(
                    TransportError::Other,
                    format!("failed to attach listeners: {e}"),
                    0,
                );
            }
        };

        let mut auth_attempted = false;
        let mut auth_succeeded = None;
        if let Some(config) = login_config {
            auth_attempted = true;
            let remaining = timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, run_login(page, url, config, &listeners)).await {
                Ok(Ok(LoginVerdict::Success { .. })) => {
                    auth_succeeded = Some(true);
                }
                Ok(Ok(LoginVerdict::Failed(reason))) => {
                    return ProbeOutcome::auth_failed(reason, 0);
                }
                Ok(Err(e)) => {
                    return ProbeOutcome::auth_failed(e.to_string(), 0);
                }
                Err(_) => {
                    return ProbeOutcome::auth_failed("login exceeded the probe deadline", 0);
                }
            }
        }

        // Navigate and wait for the DOM to parse.
        let remaining = timeout.saturating_sub(started.elapsed());
        let navigated = tokio::time::timeout(remaining, async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        match navigated {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let text = e.to_string();
                let mut outcome = ProbeOutcome::transport(
                    classify_navigation_error(&text),
                    text,
                    0,
                );
                outcome.auth_attempted = auth_attempted;
                outcome.auth_succeeded = auth_succeeded;
                return outcome;
            }
            Err(_) => {
                let mut outcome = ProbeOutcome::transport(
                    TransportError::Timeout,
                    "navigation exceeded the probe deadline",
                    0,
                );
                outcome.auth_attempted = auth_attempted;
                outcome.auth_succeeded = auth_succeeded;
                return outcome;
            }
        }

        // Best effort: pages with long-polling never go quiet, and that is
        // not an error.
        let idle_ceiling = NETWORK_IDLE_CEILING.min(timeout.saturating_sub(started.elapsed()));
        listeners.wait_for_network_idle(idle_ceiling).await;

        let empty_content = self.inspect_empty_content(page, url).await;
        let iframe_checks = self.inspect_iframes(page, url).await;
        let video_checks = self.inspect_videos(page, url).await;

        ProbeOutcome {
            http_status: listeners.document_status(),
            latency_ms: 0, // stamped by the caller from probe start
            content_length: None,
            transport_error: None,
            error_kind: None,
            error_message: None,
            empty_content,
            iframe_checks,
            video_checks,
            console_errors: listeners.console_errors(),
            network_errors: listeners.network_errors(),
            screenshot_ref: None,
            auth_attempted,
            auth_succeeded,
        }
    }

    async fn inspect_empty_content(&self, page: &Page, url: &str) -> Option<EmptyContentCheck> {
        match evaluate_into::<EmptyContentCheck>(page, js_scripts::EMPTY_CONTENT_SCRIPT).await {
            Ok(check) => Some(check),
            Err(e) => {
                debug!(url, error = %e, "empty-content inspection failed");
                None
            }
        }
    }

    async fn inspect_iframes(&self, page: &Page, url: &str) -> Vec<IframeCheck> {
        match evaluate_into::<Vec<IframeCheck>>(page, js_scripts::IFRAME_SCRIPT).await {
            Ok(checks) => checks,
            Err(e) => {
                debug!(url, error = %e, "iframe inspection failed");
                Vec::new()
            }
        }
    }

    async fn inspect_videos(&self, page: &Page, url: &str) -> Vec<VideoCheck> {
        match evaluate_into::<Vec<RawVideoCheck>>(page, js_scripts::VIDEO_SCRIPT).await {
            Ok(raw) => raw
                .into_iter()
                .map(|v| {
                    let playable =
                        video_playable(v.ready_state, v.network_state, v.has_source, v.error_code);
                    VideoCheck {
                        ready_state: v.ready_state,
                        network_state: v.network_state,
                        has_source: v.has_source,
                        error_code: v.error_code,
                        error_message: v.error_message,
                        playable,
                    }
                })
                .collect(),
            Err(e) => {
                debug!(url, error = %e, "video inspection failed");
                Vec::new()
            }
        }
    }

    /// Capture a single viewport screenshot to a content-addressed path.
    async fn capture_screenshot(&self, page: &Page, url: &str) -> Option<String> {
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            ..Default::default()
        };
        let data = match page.screenshot(params).await {
            Ok(data) => data,
            Err(e) => {
                debug!(url, error = %e, "screenshot capture failed");
                return None;
            }
        };

        let path = self.screenshot_dir.join(screenshot_file_name(url));
        if let Err(e) = tokio::fs::create_dir_all(&self.screenshot_dir).await {
            warn!(error = %e, "failed to create screenshot directory");
            return None;
        }
        match tokio::fs::write(&path, data).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(url, error = %e, "failed to write screenshot");
                None
            }
        }
    }
}

/// Content-addressed screenshot name: base64 of the URL prefix plus a
/// millisecond timestamp.
#[must_use]
pub fn screenshot_file_name(url: &str) -> String {
    let prefix: String = url.chars().take(32).collect();
    let encoded = URL_SAFE_NO_PAD.encode(prefix.as_bytes());
    format!("{encoded}_{}.png", chrono::Utc::now().timestamp_millis())
}

/// Map a chromium navigation error message onto the transport taxonomy.
fn classify_navigation_error(text: &str) -> TransportError {
    let lower = text.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        TransportError::Timeout
    } else if lower.contains("err_name_not_resolved") || lower.contains("dns") {
        TransportError::Dns
    } else if lower.contains("err_cert") || lower.contains("ssl") || lower.contains("tls") {
        TransportError::Tls
    } else if lower.contains("err_connection") || lower.contains("err_address") {
        TransportError::Connection
    } else {
        TransportError::Other
    }
}

async fn evaluate_into<T: serde::de::DeserializeOwned>(page: &Page, script: &str) -> Result<T> {
    page.evaluate(script.to_string())
        .await
        .context("evaluation failed")?
        .into_value()
        .context("evaluation returned an unexpected shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_error_classification() {
        assert_eq!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED"),
            TransportError::Dns
        );
        assert_eq!(
            classify_navigation_error("net::ERR_CONNECTION_REFUSED"),
            TransportError::Connection
        );
        assert_eq!(
            classify_navigation_error("net::ERR_CERT_AUTHORITY_INVALID"),
            TransportError::Tls
        );
        assert_eq!(
            classify_navigation_error("Request timed out"),
            TransportError::Timeout
        );
        assert_eq!(
            classify_navigation_error("net::ERR_ABORTED"),
            TransportError::Other
        );
    }

    #[test]
    fn screenshot_names_are_url_addressed() {
        let name = screenshot_file_name("https://example.com/some/long/path/beyond/prefix");
        assert!(name.ends_with(".png"));
        // The base64url alphabet may itself contain '_', so split from the
        // right where the timestamp suffix begins.
        let (encoded, suffix) = name.rsplit_once('_').unwrap();
        assert!(suffix.trim_end_matches(".png").parse::<i64>().is_ok());
        let decoded = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&decoded),
            "https://example.com/some/long/pa"
        );
    }
}
