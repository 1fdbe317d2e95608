//! Registry service
//!
//! Validated mutations over the monitored-URL registry: add, update, remove,
//! and on-demand checks. Uniqueness is enforced on the normalized URL and the
//! trimmed name; dependency edits are checked against the transitive closure;
//! secret fields follow the preserve/clear policy on updates and never leave
//! through reads.

pub mod validate;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::classifier::UrlStatus;
use crate::dispatcher::ProbeDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    new_object_id, AuthConfig, MonitoredUrl, NewUrl, ProbeResult, UrlPatch,
    DEFAULT_CHECK_INTERVAL_MS,
};
use crate::monitor_events::{MonitorEvent, MonitorEventBus};
use crate::url_store::{normalize_url, UrlFilter, UrlStore};

/// Retries when a config update races a probe's status write.
const UPDATE_RETRIES: u32 = 3;

/// Validated gateway for registry mutations.
#[derive(Clone)]
pub struct RegistryService {
    store: UrlStore,
    dispatcher: Arc<ProbeDispatcher>,
    bus: MonitorEventBus,
    production: bool,
}

impl RegistryService {
    #[must_use]
    pub fn new(
        store: UrlStore,
        dispatcher: Arc<ProbeDispatcher>,
        bus: MonitorEventBus,
        production: bool,
    ) -> Self {
        Self {
            store,
            dispatcher,
            bus,
            production,
        }
    }

    /// List entries. Read paths never include secrets; callers serialize
    /// through the secret-free views.
    pub async fn list(&self, filter: &UrlFilter) -> EngineResult<Vec<MonitoredUrl>> {
        self.store.find_all(filter).await
    }

    pub async fn get(&self, id: &str) -> EngineResult<MonitoredUrl> {
        self.store.find_by_id(id).await
    }

    /// Validate and create a registry entry.
    pub async fn add_url(&self, input: NewUrl) -> EngineResult<MonitoredUrl> {
        validate::validate_url(&input.url, self.production)?;
        let url = input.url.trim().to_string();

        let name = match &input.name {
            Some(name) => validate::validate_name(name)?,
            None => validate::validate_name(&derive_name(&url))?,
        };

        let check_interval_ms = input
            .check_interval_ms
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MS);
        validate::validate_check_interval(check_interval_ms)?;

        let dependencies = input.dependencies.unwrap_or_default();
        validate::validate_dependencies(None, &dependencies)?;

        let auth = match input.auth {
            // An explicit requiresAuth=false overrides any credentials sent.
            Some(_) if input.requires_auth == Some(false) => None,
            Some(auth) => {
                let auth = normalize_new_auth(auth);
                validate::validate_auth(&auth)?;
                Some(auth)
            }
            None => None,
        };

        // Friendly conflict errors before the unique indexes would fire.
        if self.store.find_by_normalized_url(&url).await?.is_some() {
            return Err(EngineError::Conflict(format!(
                "url already registered: {}",
                normalize_url(&url)
            )));
        }
        if self.store.find_by_name(&name).await?.is_some() {
            return Err(EngineError::Conflict(format!(
                "name already registered: {name}"
            )));
        }

        let now = Utc::now();
        let entry = MonitoredUrl {
            id: new_object_id(),
            url,
            name,
            description: input.description,
            group: input.group,
            enabled: input.enabled.unwrap_or(true),
            check_interval_ms,
            dependencies,
            auth,
            status: UrlStatus::Fresh,
            latency_ms: None,
            history: Vec::new(),
            last_checked: None,
            http_status: None,
            status_message: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = self.store.insert(&entry).await?;
        info!(url_id = %stored.id, url = %stored.url, "registered url");
        Ok(stored)
    }

    /// Validate and apply a partial update. Touched fields are re-validated;
    /// the dependency DAG is re-checked over the whole closure; a concurrent
    /// probe's version bump is absorbed by refetch-and-retry.
    pub async fn update_url(&self, id: &str, patch: UrlPatch) -> EngineResult<MonitoredUrl> {
        for attempt in 0..=UPDATE_RETRIES {
            let current = self.store.find_by_id(id).await?;
            let candidate = self.apply_patch(&current, &patch).await?;

            match self.store.update_entry(&candidate).await {
                Ok(updated) => {
                    debug!(url_id = id, "registry entry updated");
                    return Ok(updated);
                }
                Err(EngineError::VersionConflict { .. }) if attempt < UPDATE_RETRIES => {
                    debug!(url_id = id, attempt, "update raced a probe write, refetching");
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::VersionConflict {
            id: id.to_string(),
            expected: -1,
        })
    }

    /// Remove an entry. A probe already in flight may still complete; its
    /// persistence then becomes a no-op through the store's NotFound path.
    pub async fn remove_url(&self, id: &str) -> EngineResult<()> {
        self.store.delete(id).await?;
        info!(url_id = id, "removed url");
        self.bus.publish(MonitorEvent::sync_complete(1));
        Ok(())
    }

    /// Probe an entry immediately and return the classified result.
    pub async fn check_now(&self, id: &str) -> EngineResult<ProbeResult> {
        self.dispatcher.dispatch(id).await
    }

    /// Probe all enabled entries and return their results.
    pub async fn check_all(&self) -> EngineResult<Vec<ProbeResult>> {
        self.dispatcher.dispatch_all().await
    }

    async fn apply_patch(&self, current: &MonitoredUrl, patch: &UrlPatch) -> EngineResult<MonitoredUrl> {
        let mut candidate = current.clone();

        if let Some(url) = &patch.url {
            validate::validate_url(url, self.production)?;
            let trimmed = url.trim().to_string();
            if normalize_url(&trimmed) != normalize_url(&current.url)
                && let Some(existing) = self.store.find_by_normalized_url(&trimmed).await?
                && existing.id != current.id
            {
                return Err(EngineError::Conflict(format!(
                    "url already registered: {}",
                    normalize_url(&trimmed)
                )));
            }
            candidate.url = trimmed;
        }

        if let Some(name) = &patch.name {
            let name = validate::validate_name(name)?;
            if name != current.name
                && let Some(existing) = self.store.find_by_name(&name).await?
                && existing.id != current.id
            {
                return Err(EngineError::Conflict(format!(
                    "name already registered: {name}"
                )));
            }
            candidate.name = name;
        }

        if let Some(description) = &patch.description {
            candidate.description = if description.is_empty() {
                None
            } else {
                Some(description.clone())
            };
        }

        if let Some(group) = patch.group {
            candidate.group = Some(group);
        }

        if let Some(enabled) = patch.enabled {
            candidate.enabled = enabled;
        }

        if let Some(interval) = patch.check_interval_ms {
            validate::validate_check_interval(interval)?;
            candidate.check_interval_ms = interval;
        }

        if let Some(dependencies) = &patch.dependencies {
            validate::validate_dependencies(Some(&current.id), dependencies)?;
            let all = self.store.find_all(&UrlFilter::default()).await?;
            validate::check_dependency_cycle(&current.id, dependencies, &all)?;
            candidate.dependencies = dependencies.clone();
        }

        if let Some(auth) = &patch.auth {
            let merged = merge_auth(current.auth.as_ref(), auth.clone());
            match &merged {
                AuthConfig::None => candidate.auth = None,
                other => {
                    validate::validate_auth(other)?;
                    candidate.auth = Some(merged);
                }
            }
        }

        Ok(candidate)
    }
}

/// Default entry name derived from the URL's host.
fn derive_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unnamed".to_string())
}

/// On create there is no previous secret to preserve: an explicit empty
/// string still means "no value".
fn normalize_new_auth(auth: AuthConfig) -> AuthConfig {
    merge_auth(None, auth)
}

/// Merge an incoming auth config over the stored one. Secret fields follow
/// the write-only policy: omitted means preserve the stored value, an
/// explicit empty string clears it.
fn merge_auth(existing: Option<&AuthConfig>, incoming: AuthConfig) -> AuthConfig {
    fn merged_secret(incoming: Option<String>, existing: Option<&String>) -> Option<String> {
        match incoming {
            None => existing.cloned(),
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s),
        }
    }

    match incoming {
        AuthConfig::Basic { username, password } => {
            let previous = match existing {
                Some(AuthConfig::Basic { password, .. }) => password.as_ref(),
                _ => None,
            };
            AuthConfig::Basic {
                username,
                password: merged_secret(password, previous),
            }
        }
        AuthConfig::Bearer { token } => {
            let previous = match existing {
                Some(AuthConfig::Bearer { token }) => token.as_ref(),
                _ => None,
            };
            AuthConfig::Bearer {
                token: merged_secret(token, previous),
            }
        }
        AuthConfig::ApiKey { header, key } => {
            let previous = match existing {
                Some(AuthConfig::ApiKey { key, .. }) => key.as_ref(),
                _ => None,
            };
            AuthConfig::ApiKey {
                header,
                key: merged_secret(key, previous),
            }
        }
        AuthConfig::BrowserLogin(mut config) => {
            if let Some(AuthConfig::BrowserLogin(previous)) = existing {
                config.username = merged_secret(config.username, previous.username.as_ref());
                config.password = merged_secret(config.password, previous.password.as_ref());
            } else {
                config.username = merged_secret(config.username, None);
                config.password = merged_secret(config.password, None);
            }
            AuthConfig::BrowserLogin(config)
        }
        AuthConfig::None => AuthConfig::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BrowserLoginConfig;

    #[test]
    fn derive_name_uses_host() {
        assert_eq!(derive_name("https://api.example.com/health"), "api.example.com");
        assert_eq!(derive_name("not a url"), "unnamed");
    }

    #[test]
    fn merge_preserves_omitted_secret() {
        let stored = AuthConfig::Bearer { token: Some("stored-token".into()) };
        let merged = merge_auth(Some(&stored), AuthConfig::Bearer { token: None });
        assert_eq!(merged, AuthConfig::Bearer { token: Some("stored-token".into()) });
    }

    #[test]
    fn merge_clears_on_explicit_empty() {
        let stored = AuthConfig::Bearer { token: Some("stored-token".into()) };
        let merged = merge_auth(Some(&stored), AuthConfig::Bearer { token: Some(String::new()) });
        assert_eq!(merged, AuthConfig::Bearer { token: None });
    }

    #[test]
    fn merge_does_not_leak_across_auth_types() {
        let stored = AuthConfig::Bearer { token: Some("stored-token".into()) };
        let merged = merge_auth(
            Some(&stored),
            AuthConfig::Basic { username: "user".into(), password: None },
        );
        assert_eq!(
            merged,
            AuthConfig::Basic { username: "user".into(), password: None }
        );
    }

    #[test]
    fn merge_browser_login_credentials() {
        let stored = AuthConfig::BrowserLogin(BrowserLoginConfig {
            username: Some("probe@example.com".into()),
            password: Some("old-secret".into()),
            ..BrowserLoginConfig::default()
        });
        let incoming = AuthConfig::BrowserLogin(BrowserLoginConfig {
            login_url: Some("https://example.com/login".into()),
            ..BrowserLoginConfig::default()
        });
        let merged = merge_auth(Some(&stored), incoming);
        match merged {
            AuthConfig::BrowserLogin(config) => {
                assert_eq!(config.username.as_deref(), Some("probe@example.com"));
                assert_eq!(config.password.as_deref(), Some("old-secret"));
                assert_eq!(config.login_url.as_deref(), Some("https://example.com/login"));
            }
            other => panic!("unexpected auth: {other:?}"),
        }
    }
}
