//! Lightweight HTTP prober
//!
//! Issues a HEAD request with a timeout and transparently falls back to GET
//! when the server rejects HEAD (405) or the transport fails for a reason
//! other than a timeout. Latency is wall time from dispatch to headers.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::model::{AuthConfig, ProbeOutcome, TransportError};

/// Shared-client HTTP prober.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build the prober with a shared connection pool.
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("pulsecheck/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Probe a URL. HEAD first; on 405 or a non-timeout transport failure,
    /// retry the same URL with GET. A timed-out HEAD is not a method problem
    /// and a retry would double the reported latency of an unresponsive
    /// endpoint, so it returns immediately as a timeout outcome.
    pub async fn probe(
        &self,
        url: &str,
        auth: Option<&AuthConfig>,
        timeout: Duration,
    ) -> ProbeOutcome {
        let started = Instant::now();

        let head = self
            .request(reqwest::Method::HEAD, url, auth, timeout)
            .send()
            .await;

        match head {
            Ok(response) if response.status().as_u16() != 405 => {
                outcome_from_response(&response, started)
            }
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "HEAD unsupported, retrying with GET");
                self.probe_get(url, auth, timeout, started).await
            }
            Err(e) if e.is_timeout() => {
                ProbeOutcome::transport(
                    TransportError::Timeout,
                    error_chain_text(&e),
                    started.elapsed().as_millis() as u64,
                )
            }
            Err(e) => {
                debug!(url, error = %e, "HEAD transport failure, retrying with GET");
                self.probe_get(url, auth, timeout, started).await
            }
        }
    }

    async fn probe_get(
        &self,
        url: &str,
        auth: Option<&AuthConfig>,
        timeout: Duration,
        started: Instant,
    ) -> ProbeOutcome {
        match self
            .request(reqwest::Method::GET, url, auth, timeout)
            .send()
            .await
        {
            Ok(response) => outcome_from_response(&response, started),
            Err(e) => {
                let latency = started.elapsed().as_millis() as u64;
                ProbeOutcome::transport(classify_transport(&e), error_chain_text(&e), latency)
            }
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Option<&AuthConfig>,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url).timeout(timeout);
        match auth {
            Some(AuthConfig::Basic { username, password }) => {
                builder = builder.basic_auth(username, password.as_deref());
            }
            Some(AuthConfig::Bearer { token: Some(token) }) => {
                builder = builder.bearer_auth(token);
            }
            Some(AuthConfig::ApiKey { header, key: Some(key) }) => {
                builder = builder.header(header.as_str(), key.as_str());
            }
            _ => {}
        }
        builder
    }
}

fn outcome_from_response(response: &reqwest::Response, started: Instant) -> ProbeOutcome {
    let latency = started.elapsed().as_millis() as u64;
    ProbeOutcome::http(
        response.status().as_u16(),
        latency,
        response.content_length(),
    )
}

/// Map a reqwest error onto the transport taxonomy. DNS and TLS problems hide
/// inside the source chain, so the chain text is inspected before the broader
/// `is_connect` bucket.
fn classify_transport(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout;
    }
    let chain = error_chain_text(e).to_lowercase();
    if chain.contains("dns") || chain.contains("resolve") {
        return TransportError::Dns;
    }
    if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        return TransportError::Tls;
    }
    if e.is_connect() {
        return TransportError::Connection;
    }
    TransportError::Other
}

/// Join an error with its sources into one line for diagnostics.
fn error_chain_text(e: &dyn std::error::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
