//! Registry input validation
//!
//! Field validation for registry mutations: name character class, URL shape,
//! dependency id format, auth completeness, and cycle detection over the
//! transitive dependency closure.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::model::{AuthConfig, MonitoredUrl, MAX_URL_LEN, MIN_CHECK_INTERVAL_MS};

/// Allowed name shape: 2-100 chars of letters, digits, space, dot,
/// underscore, dash.
static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9 ._-]{2,100}$").expect("name pattern is valid")
});

/// Dependency ids are 24 hex chars.
static OBJECT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("object id pattern is valid"));

/// Validate and trim an entry name.
pub fn validate_name(name: &str) -> EngineResult<String> {
    let trimmed = name.trim();
    if !NAME_RE.is_match(trimmed) {
        return Err(EngineError::Validation(format!(
            "name must be 2-100 characters of letters, digits, spaces, '.', '_' or '-': {trimmed:?}"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate a monitored URL. Production mode additionally rejects private
/// and loopback hosts.
pub fn validate_url(url: &str, production: bool) -> EngineResult<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation("url is required".into()));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(EngineError::Validation(format!(
            "url exceeds {MAX_URL_LEN} characters"
        )));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| EngineError::Validation(format!("invalid url: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::Validation(
            "url must use http or https".into(),
        ));
    }

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EngineError::Validation("url must have a hostname".into()))?;

    if production && is_private_host(host) {
        return Err(EngineError::Validation(format!(
            "private or loopback host not allowed: {host}"
        )));
    }

    Ok(())
}

/// Whether a hostname points into private, loopback, or link-local space.
fn is_private_host(host: &str) -> bool {
    let lower = host.to_lowercase();
    if lower == "localhost" || lower.ends_with(".localhost") || lower.ends_with(".local") {
        return true;
    }
    // Bracketed IPv6 literals arrive without brackets from Url::host_str.
    match lower.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(ip)) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(std::net::IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                // Unique-local fc00::/7 and link-local fe80::/10.
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

/// Validate a dependency list: 24-hex ids, no duplicates, no self-reference.
pub fn validate_dependencies(own_id: Option<&str>, dependencies: &[String]) -> EngineResult<()> {
    let mut seen = HashSet::with_capacity(dependencies.len());
    for dep in dependencies {
        if !OBJECT_ID_RE.is_match(dep) {
            return Err(EngineError::Validation(format!(
                "dependency id must be 24 hex characters: {dep:?}"
            )));
        }
        if !seen.insert(dep.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate dependency id: {dep}"
            )));
        }
        if own_id == Some(dep.as_str()) {
            return Err(EngineError::Validation(
                "an entry cannot depend on itself".into(),
            ));
        }
    }
    Ok(())
}

/// Validate auth completeness. Browser login requires both credentials;
/// basic auth requires a username.
pub fn validate_auth(auth: &AuthConfig) -> EngineResult<()> {
    match auth {
        AuthConfig::BrowserLogin(config) => {
            if config.username.as_deref().is_none_or(|u| u.trim().is_empty()) {
                return Err(EngineError::Validation(
                    "browser login requires a username".into(),
                ));
            }
            if config.password.as_deref().is_none_or(|p| p.is_empty()) {
                return Err(EngineError::Validation(
                    "browser login requires a password".into(),
                ));
            }
            Ok(())
        }
        AuthConfig::Basic { username, .. } => {
            if username.trim().is_empty() {
                return Err(EngineError::Validation(
                    "basic auth requires a username".into(),
                ));
            }
            Ok(())
        }
        AuthConfig::ApiKey { header, .. } => {
            if header.trim().is_empty() {
                return Err(EngineError::Validation(
                    "api key auth requires a header name".into(),
                ));
            }
            Ok(())
        }
        AuthConfig::None | AuthConfig::Bearer { .. } => Ok(()),
    }
}

/// Validate a per-entry check interval.
pub fn validate_check_interval(interval_ms: u64) -> EngineResult<()> {
    if interval_ms < MIN_CHECK_INTERVAL_MS {
        return Err(EngineError::Validation(format!(
            "check interval must be at least {MIN_CHECK_INTERVAL_MS} ms"
        )));
    }
    Ok(())
}

/// Reject dependency sets that close a cycle through the transitive closure.
///
/// Walks the dependency graph from every proposed dependency with one
/// visited set shared across the whole validation; reaching `entry_id`
/// through any path is a cycle. The shared set matters: resetting it per
/// top-level dependency can miss cycles through shared ancestors.
pub fn check_dependency_cycle(
    entry_id: &str,
    new_dependencies: &[String],
    all_entries: &[MonitoredUrl],
) -> EngineResult<()> {
    let graph: HashMap<&str, &[String]> = all_entries
        .iter()
        .map(|e| (e.id.as_str(), e.dependencies.as_slice()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    for dep in new_dependencies {
        if visited.contains(dep.as_str()) {
            continue;
        }
        stack.push(dep.as_str());

        while let Some(node) = stack.pop() {
            if node == entry_id {
                return Err(EngineError::Validation(format!(
                    "dependency cycle detected through {dep}"
                )));
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = graph.get(node) {
                for downstream in next.iter() {
                    if !visited.contains(downstream.as_str()) {
                        stack.push(downstream.as_str());
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::UrlStatus;
    use crate::model::BrowserLoginConfig;
    use chrono::Utc;

    fn entry_with_deps(id: &str, deps: &[&str]) -> MonitoredUrl {
        let now = Utc::now();
        MonitoredUrl {
            id: id.to_string(),
            url: format!("https://{id}.example.com"),
            name: format!("entry-{id}"),
            description: None,
            group: None,
            enabled: true,
            check_interval_ms: 60_000,
            dependencies: deps.iter().map(|s| (*s).to_string()).collect(),
            auth: None,
            status: UrlStatus::Fresh,
            latency_ms: None,
            history: Vec::new(),
            last_checked: None,
            http_status: None,
            status_message: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn hex_id(seed: u8) -> String {
        format!("{:024x}", u128::from(seed))
    }

    #[test]
    fn name_character_class() {
        assert!(validate_name("Health API_v2.1-beta").is_ok());
        assert_eq!(validate_name("  padded  ").unwrap(), "padded");
        assert!(validate_name("x").is_err());
        assert!(validate_name("bad/name").is_err());
        assert!(validate_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn url_shape() {
        assert!(validate_url("https://api.example.com/health", false).is_ok());
        assert!(validate_url("ftp://example.com", false).is_err());
        assert!(validate_url("https://", false).is_err());
        assert!(validate_url("not a url", false).is_err());
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LEN));
        assert!(validate_url(&long, false).is_err());
    }

    #[test]
    fn private_hosts_rejected_only_in_production() {
        for url in [
            "http://localhost:3000/health",
            "http://127.0.0.1/",
            "http://10.0.0.5/",
            "http://192.168.1.1/status",
            "http://[::1]/",
        ] {
            assert!(validate_url(url, false).is_ok(), "{url} in development");
            assert!(validate_url(url, true).is_err(), "{url} in production");
        }
        assert!(validate_url("https://example.com", true).is_ok());
    }

    #[test]
    fn dependency_id_format() {
        let good = hex_id(1);
        assert!(validate_dependencies(None, &[good.clone()]).is_ok());
        assert!(validate_dependencies(None, &["short".into()]).is_err());
        assert!(validate_dependencies(None, &[good.clone(), good.clone()]).is_err());
        assert!(validate_dependencies(Some(&good), &[good.clone()]).is_err());
    }

    #[test]
    fn browser_login_requires_credentials() {
        let mut config = BrowserLoginConfig {
            username: Some("user".into()),
            password: Some("secret".into()),
            ..BrowserLoginConfig::default()
        };
        assert!(validate_auth(&AuthConfig::BrowserLogin(config.clone())).is_ok());

        config.password = None;
        assert!(validate_auth(&AuthConfig::BrowserLogin(config.clone())).is_err());

        config.password = Some("secret".into());
        config.username = None;
        assert!(validate_auth(&AuthConfig::BrowserLogin(config)).is_err());
    }

    #[test]
    fn check_interval_floor() {
        assert!(validate_check_interval(10_000).is_ok());
        assert!(validate_check_interval(9_999).is_err());
    }

    #[test]
    fn direct_cycle_rejected() {
        let (a, b) = (hex_id(1), hex_id(2));
        let entries = vec![entry_with_deps(&a, &[&b]), entry_with_deps(&b, &[])];
        // b -> a while a -> b already exists.
        let err = check_dependency_cycle(&b, &[a.clone()], &entries).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn transitive_cycle_rejected() {
        let (a, b, c) = (hex_id(1), hex_id(2), hex_id(3));
        let entries = vec![
            entry_with_deps(&a, &[&b]),
            entry_with_deps(&b, &[&c]),
            entry_with_deps(&c, &[]),
        ];
        // c -> a closes a -> b -> c -> a.
        let err = check_dependency_cycle(&c, &[a.clone()], &entries).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn shared_ancestor_is_not_a_false_cycle() {
        // d -> [b, c], both b and c -> a. A diamond, not a cycle; the shared
        // visited set must not misreport the second path.
        let (a, b, c, d) = (hex_id(1), hex_id(2), hex_id(3), hex_id(4));
        let entries = vec![
            entry_with_deps(&a, &[]),
            entry_with_deps(&b, &[&a]),
            entry_with_deps(&c, &[&a]),
            entry_with_deps(&d, &[]),
        ];
        assert!(check_dependency_cycle(&d, &[b.clone(), c.clone()], &entries).is_ok());
    }

    #[test]
    fn cycle_through_shared_ancestor_is_caught() {
        // a -> b -> c, updating c with [x, b] where x -> b too. The cycle
        // runs through b regardless of which top-level dep is walked first.
        let (a, b, c, x) = (hex_id(1), hex_id(2), hex_id(3), hex_id(4));
        let entries = vec![
            entry_with_deps(&a, &[&b]),
            entry_with_deps(&b, &[&c]),
            entry_with_deps(&c, &[]),
            entry_with_deps(&x, &[&b]),
        ];
        let err = check_dependency_cycle(&c, &[x.clone(), b.clone()], &entries).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn acyclic_chain_accepted() {
        let (a, b, c) = (hex_id(1), hex_id(2), hex_id(3));
        let entries = vec![
            entry_with_deps(&a, &[]),
            entry_with_deps(&b, &[&a]),
            entry_with_deps(&c, &[]),
        ];
        assert!(check_dependency_cycle(&c, &[b.clone()], &entries).is_ok());
    }
}
