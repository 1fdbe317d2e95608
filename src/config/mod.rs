//! Engine configuration
//!
//! Environment-driven configuration loaded once at startup. Missing required
//! variables or unparsable values are fatal: the binary logs the problem and
//! exits non-zero rather than limping along misconfigured.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deployment mode. Production tightens validation (private-IP rejection)
/// and makes `DATABASE_URL` mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Fallback sweep interval: 5 minutes.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 300_000;

/// Fallback HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 35_000;

/// Dispatcher timeout envelope; browser probes get at least this much.
pub const DEFAULT_PROBE_DEADLINE_MS: u64 = 60_000;

/// Runtime configuration for the monitoring engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) env: AppEnv,
    pub(crate) database_url: String,
    pub(crate) port: u16,
    /// Master sweep interval for the scheduler.
    pub(crate) check_interval_ms: u64,
    /// Per-request timeout for the HTTP prober.
    pub(crate) request_timeout_ms: u64,
    /// Absolute timeout envelope applied by the dispatcher.
    pub(crate) probe_deadline_ms: u64,
    /// Optional bearer token protecting mutations and the push channel.
    pub(crate) api_token: Option<String>,
    pub(crate) log_level: String,
    /// Directory for screenshots captured on failing browser probes.
    pub(crate) screenshot_dir: std::path::PathBuf,
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    /// Returns an error when `DATABASE_URL` is missing in production or any
    /// numeric variable fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        let env = AppEnv::from_env();

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ if env == AppEnv::Production => {
                anyhow::bail!("DATABASE_URL is required in production")
            }
            _ => "sqlite://pulsecheck.sqlite?mode=rwc".to_string(),
        };

        let port = env_parsed("PORT", 3000u16)?;
        let check_interval_ms = env_parsed("CHECK_INTERVAL", DEFAULT_CHECK_INTERVAL_MS)?
            .max(crate::model::MIN_CHECK_INTERVAL_MS);
        let request_timeout_ms = env_parsed("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        let probe_deadline_ms =
            env_parsed("PROBE_DEADLINE_MS", DEFAULT_PROBE_DEADLINE_MS)?.max(request_timeout_ms);

        let api_token = std::env::var("API_TOKEN").ok().filter(|t| !t.trim().is_empty());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| match env {
            AppEnv::Production => "info".to_string(),
            AppEnv::Development => "debug".to_string(),
        });

        let screenshot_dir = std::env::var("SCREENSHOT_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("screenshots"));

        Ok(Self {
            env,
            database_url,
            port,
            check_interval_ms,
            request_timeout_ms,
            probe_deadline_ms,
            api_token,
            log_level,
            screenshot_dir,
        })
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env == AppEnv::Production
    }

    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn probe_deadline(&self) -> Duration {
        Duration::from_millis(self.probe_deadline_ms)
    }

    #[must_use]
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref()
    }

    /// Builder-style token override, mostly for embedding and tests.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    #[must_use]
    pub fn screenshot_dir(&self) -> &std::path::Path {
        &self.screenshot_dir
    }
}

impl Default for EngineConfig {
    /// Development defaults, used by tests and ad-hoc embedding.
    fn default() -> Self {
        Self {
            env: AppEnv::Development,
            database_url: "sqlite://pulsecheck.sqlite?mode=rwc".into(),
            port: 3000,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            probe_deadline_ms: DEFAULT_PROBE_DEADLINE_MS,
            api_token: None,
            log_level: "debug".into(),
            screenshot_dir: "screenshots".into(),
        }
    }
}

fn env_parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_grade() {
        let config = EngineConfig::default();
        assert!(!config.is_production());
        assert_eq!(config.port(), 3000);
        assert_eq!(config.check_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_millis(35_000));
        assert!(config.probe_deadline() >= config.request_timeout());
        assert!(config.api_token().is_none());
    }
}
