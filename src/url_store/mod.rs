//! Durable registry and probe-result persistence.
//!
//! SQLite with WAL mode holds five logical collections: `monitored_urls`
//! (bounded latency history as a JSON array column), `probe_results`,
//! `error_logs`, `iframe_checks`, and `video_checks`. Status writes use
//! optimistic concurrency: the caller supplies the version it read, and a
//! mismatch surfaces as [`EngineError::VersionConflict`] so the caller can
//! refetch and retry.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use url::Url;

use crate::classifier::UrlStatus;
use crate::error::{EngineError, EngineResult};
use crate::model::{AuthConfig, MonitoredUrl, ProbeResult, UrlGroup};

/// Bound on the per-entry latency history.
pub const HISTORY_LIMIT: usize = 20;

/// Bound on retained probe records per URL.
pub const PROBE_RECORDS_LIMIT: i64 = 1_000;

/// SQL schema, applied idempotently at open.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS monitored_urls (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    grp TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    check_interval_ms INTEGER NOT NULL,
    dependencies TEXT NOT NULL DEFAULT '[]',
    auth TEXT,
    status TEXT NOT NULL,
    latency_ms INTEGER,
    history TEXT NOT NULL DEFAULT '[]',
    last_checked INTEGER,
    http_status INTEGER,
    status_message TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_urls_normalized ON monitored_urls(normalized_url);
CREATE UNIQUE INDEX IF NOT EXISTS idx_urls_name ON monitored_urls(name);
CREATE INDEX IF NOT EXISTS idx_urls_enabled ON monitored_urls(enabled);
CREATE INDEX IF NOT EXISTS idx_urls_status ON monitored_urls(status);
CREATE INDEX IF NOT EXISTS idx_urls_last_checked ON monitored_urls(last_checked);

CREATE TABLE IF NOT EXISTS probe_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id TEXT NOT NULL,
    status TEXT NOT NULL,
    http_status INTEGER,
    latency_ms INTEGER NOT NULL,
    content_length INTEGER,
    error_kind TEXT,
    error_message TEXT,
    console_errors TEXT,
    network_errors TEXT,
    screenshot_ref TEXT,
    auth_attempted INTEGER NOT NULL DEFAULT 0,
    auth_succeeded INTEGER,
    persisted INTEGER NOT NULL DEFAULT 1,
    checked_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_probe_results_url ON probe_results(url_id, id);

CREATE TABLE IF NOT EXISTS error_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    location TEXT NOT NULL,
    reason TEXT NOT NULL,
    recommendation TEXT NOT NULL,
    checked_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_error_logs_url ON error_logs(url_id, id);

CREATE TABLE IF NOT EXISTS iframe_checks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    probe_id INTEGER NOT NULL,
    url_id TEXT NOT NULL,
    src TEXT,
    has_valid_src INTEGER NOT NULL,
    connected INTEGER NOT NULL,
    has_box INTEGER NOT NULL,
    loaded INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_iframe_checks_probe ON iframe_checks(probe_id);

CREATE TABLE IF NOT EXISTS video_checks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    probe_id INTEGER NOT NULL,
    url_id TEXT NOT NULL,
    ready_state INTEGER NOT NULL,
    network_state INTEGER NOT NULL,
    has_source INTEGER NOT NULL,
    error_code INTEGER,
    error_message TEXT,
    playable INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_video_checks_probe ON video_checks(probe_id);
"#;

/// Status fields written together with each history append.
#[derive(Debug, Clone)]
pub struct StatusFields {
    pub status: UrlStatus,
    pub latency_ms: Option<u64>,
    pub http_status: Option<u16>,
    pub status_message: Option<String>,
}

/// Filter for registry listing.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    pub enabled: Option<bool>,
    pub status: Option<UrlStatus>,
    pub group: Option<UrlGroup>,
}

/// SQLite-backed registry store.
#[derive(Clone)]
pub struct UrlStore {
    pool: SqlitePool,
}

impl UrlStore {
    /// Open (or create) the database and apply the schema.
    pub async fn open(database_url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| EngineError::DatabaseUnavailable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::DatabaseUnavailable(e.to_string()))?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Liveness probe for `GET /health`.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Insert a new entry. Unique collisions on normalized URL or name
    /// surface as [`EngineError::Conflict`].
    pub async fn insert(&self, entry: &MonitoredUrl) -> EngineResult<MonitoredUrl> {
        let normalized = normalize_url(&entry.url);
        let result = sqlx::query(
            r#"
            INSERT INTO monitored_urls (
                id, url, normalized_url, name, description, grp, enabled,
                check_interval_ms, dependencies, auth, status, latency_ms,
                history, last_checked, http_status, status_message,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.url)
        .bind(&normalized)
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(entry.group.map(|g| to_json(&g)).transpose()?)
        .bind(entry.enabled)
        .bind(entry.check_interval_ms as i64)
        .bind(to_json(&entry.dependencies)?)
        .bind(entry.auth.as_ref().map(to_json).transpose()?)
        .bind(entry.status.as_str())
        .bind(entry.latency_ms.map(|v| v as i64))
        .bind(to_json(&entry.history)?)
        .bind(entry.last_checked.map(|t| t.timestamp_millis()))
        .bind(entry.http_status.map(i64::from))
        .bind(&entry.status_message)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.updated_at.timestamp_millis())
        .bind(entry.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self.find_by_id(&entry.id).await,
            Err(e) if is_unique_violation(&e) => Err(EngineError::Conflict(format!(
                "url or name already registered: {}",
                entry.url
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an entry's configuration fields, guarded by its version.
    ///
    /// Bumps `version` and `updated_at`. Fails with `VersionConflict` when a
    /// concurrent write advanced the row, `NotFound` when it was deleted.
    pub async fn update_entry(&self, entry: &MonitoredUrl) -> EngineResult<MonitoredUrl> {
        let normalized = normalize_url(&entry.url);
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE monitored_urls SET
                url = ?, normalized_url = ?, name = ?, description = ?,
                grp = ?, enabled = ?, check_interval_ms = ?, dependencies = ?,
                auth = ?, updated_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&entry.url)
        .bind(&normalized)
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(entry.group.map(|g| to_json(&g)).transpose()?)
        .bind(entry.enabled)
        .bind(entry.check_interval_ms as i64)
        .bind(to_json(&entry.dependencies)?)
        .bind(entry.auth.as_ref().map(to_json).transpose()?)
        .bind(now)
        .bind(&entry.id)
        .bind(entry.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => self.find_by_id(&entry.id).await,
            Ok(_) => {
                // Distinguish a lost race from a deleted row.
                match self.find_by_id(&entry.id).await {
                    Ok(_) => Err(EngineError::VersionConflict {
                        id: entry.id.clone(),
                        expected: entry.version,
                    }),
                    Err(e) => Err(e),
                }
            }
            Err(e) if is_unique_violation(&e) => Err(EngineError::Conflict(format!(
                "url or name already registered: {}",
                entry.url
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic compound write after a probe: append the latency sample
    /// (truncating the history to [`HISTORY_LIMIT`]), set the status fields,
    /// stamp `last_checked`, and bump `version`.
    pub async fn append_history(
        &self,
        id: &str,
        latency_ms: u64,
        fields: &StatusFields,
        expected_version: i64,
    ) -> EngineResult<MonitoredUrl> {
        let current = self.find_by_id(id).await?;
        if current.version != expected_version {
            return Err(EngineError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
            });
        }

        let mut history = current.history;
        history.push(latency_ms);
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }

        let now = Utc::now().timestamp_millis();
        let done = sqlx::query(
            r#"
            UPDATE monitored_urls SET
                status = ?, latency_ms = ?, http_status = ?, status_message = ?,
                history = ?, last_checked = ?, updated_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(fields.status.as_str())
        .bind(fields.latency_ms.map(|v| v as i64))
        .bind(fields.http_status.map(i64::from))
        .bind(&fields.status_message)
        .bind(to_json(&history)?)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(EngineError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
            });
        }
        self.find_by_id(id).await
    }

    pub async fn find_by_id(&self, id: &str) -> EngineResult<MonitoredUrl> {
        let row = sqlx::query("SELECT * FROM monitored_urls WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| entry_from_row(&r))
            .transpose()?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Look up an entry by its normalized URL form.
    pub async fn find_by_normalized_url(&self, url: &str) -> EngineResult<Option<MonitoredUrl>> {
        let row = sqlx::query("SELECT * FROM monitored_urls WHERE normalized_url = ?")
            .bind(normalize_url(url))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    pub async fn find_by_name(&self, name: &str) -> EngineResult<Option<MonitoredUrl>> {
        let row = sqlx::query("SELECT * FROM monitored_urls WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    /// List entries matching the filter, oldest first.
    pub async fn find_all(&self, filter: &UrlFilter) -> EngineResult<Vec<MonitoredUrl>> {
        let mut sql = String::from("SELECT * FROM monitored_urls WHERE 1=1");
        if filter.enabled.is_some() {
            sql.push_str(" AND enabled = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.group.is_some() {
            sql.push_str(" AND grp = ?");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut query = sqlx::query(&sql);
        if let Some(enabled) = filter.enabled {
            query = query.bind(enabled);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(group) = filter.group {
            query = query.bind(to_json(&group)?);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Delete an entry. Returns `NotFound` when nothing was deleted.
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        let done = sqlx::query("DELETE FROM monitored_urls WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Persist a full probe record with its diagnostic sub-records, then
    /// prune the per-URL record count to [`PROBE_RECORDS_LIMIT`].
    pub async fn record_probe(&self, result: &ProbeResult) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO probe_results (
                url_id, status, http_status, latency_ms, content_length,
                error_kind, error_message, console_errors, network_errors,
                screenshot_ref, auth_attempted, auth_succeeded, persisted, checked_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.url_id)
        .bind(result.status.as_str())
        .bind(result.http_status.map(i64::from))
        .bind(result.latency_ms as i64)
        .bind(result.content_length.map(|v| v as i64))
        .bind(result.error_kind.map(|k| to_json(&k)).transpose()?)
        .bind(&result.error_message)
        .bind(to_json(&result.console_errors)?)
        .bind(to_json(&result.network_errors)?)
        .bind(&result.screenshot_ref)
        .bind(result.auth_attempted)
        .bind(result.auth_succeeded)
        .bind(result.persisted)
        .bind(result.checked_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let probe_id = inserted.last_insert_rowid();

        for iframe in &result.iframe_checks {
            sqlx::query(
                r#"
                INSERT INTO iframe_checks (probe_id, url_id, src, has_valid_src, connected, has_box, loaded)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(probe_id)
            .bind(&result.url_id)
            .bind(&iframe.src)
            .bind(iframe.has_valid_src)
            .bind(iframe.connected)
            .bind(iframe.has_box)
            .bind(iframe.loaded)
            .execute(&mut *tx)
            .await?;
        }

        for video in &result.video_checks {
            sqlx::query(
                r#"
                INSERT INTO video_checks (probe_id, url_id, ready_state, network_state, has_source, error_code, error_message, playable)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(probe_id)
            .bind(&result.url_id)
            .bind(video.ready_state)
            .bind(video.network_state)
            .bind(video.has_source)
            .bind(video.error_code)
            .bind(&video.error_message)
            .bind(video.playable)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(details) = &result.error_details {
            sqlx::query(
                r#"
                INSERT INTO error_logs (url_id, summary, location, reason, recommendation, checked_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&result.url_id)
            .bind(&details.summary)
            .bind(&details.location)
            .bind(&details.reason)
            .bind(&details.recommendation)
            .bind(result.checked_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        // Bound retained records per URL; oldest rows go first.
        sqlx::query(
            r#"
            DELETE FROM probe_results
            WHERE url_id = ? AND id NOT IN (
                SELECT id FROM probe_results WHERE url_id = ? ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(&result.url_id)
        .bind(&result.url_id)
        .bind(PROBE_RECORDS_LIMIT)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM iframe_checks WHERE probe_id NOT IN (SELECT id FROM probe_results)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM video_checks WHERE probe_id NOT IN (SELECT id FROM probe_results)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetch the most recent probe records for a URL, newest first.
    pub async fn probe_history(&self, url_id: &str, limit: i64) -> EngineResult<Vec<ProbeResult>> {
        let rows = sqlx::query(
            "SELECT * FROM probe_results WHERE url_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(url_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(probe_from_row).collect()
    }

    /// Close the pool; outstanding writes flush first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn entry_from_row(row: &SqliteRow) -> EngineResult<MonitoredUrl> {
    let status: String = row.get("status");
    let group: Option<String> = row.get("grp");
    let auth: Option<String> = row.get("auth");
    let dependencies: String = row.get("dependencies");
    let history: String = row.get("history");

    Ok(MonitoredUrl {
        id: row.get("id"),
        url: row.get("url"),
        name: row.get("name"),
        description: row.get("description"),
        group: group.map(|g| from_json::<UrlGroup>(&g)).transpose()?,
        enabled: row.get("enabled"),
        check_interval_ms: row.get::<i64, _>("check_interval_ms") as u64,
        dependencies: from_json(&dependencies)?,
        auth: auth.map(|a| from_json::<AuthConfig>(&a)).transpose()?,
        status: status
            .parse()
            .map_err(|e: String| EngineError::Internal(e))?,
        latency_ms: row.get::<Option<i64>, _>("latency_ms").map(|v| v as u64),
        history: from_json(&history)?,
        last_checked: row
            .get::<Option<i64>, _>("last_checked")
            .map(millis_to_datetime),
        http_status: row.get::<Option<i64>, _>("http_status").map(|v| v as u16),
        status_message: row.get("status_message"),
        created_at: millis_to_datetime(row.get("created_at")),
        updated_at: millis_to_datetime(row.get("updated_at")),
        version: row.get("version"),
    })
}

fn probe_from_row(row: &SqliteRow) -> EngineResult<ProbeResult> {
    let status: String = row.get("status");
    let error_kind: Option<String> = row.get("error_kind");
    let console_errors: Option<String> = row.get("console_errors");
    let network_errors: Option<String> = row.get("network_errors");

    Ok(ProbeResult {
        url_id: row.get("url_id"),
        status: status
            .parse()
            .map_err(|e: String| EngineError::Internal(e))?,
        http_status: row.get::<Option<i64>, _>("http_status").map(|v| v as u16),
        latency_ms: row.get::<i64, _>("latency_ms") as u64,
        content_length: row
            .get::<Option<i64>, _>("content_length")
            .map(|v| v as u64),
        error_kind: error_kind.map(|k| from_json(&k)).transpose()?,
        error_message: row.get("error_message"),
        error_details: None,
        checked_at: millis_to_datetime(row.get("checked_at")),
        console_errors: console_errors
            .map(|c| from_json(&c))
            .transpose()?
            .unwrap_or_default(),
        network_errors: network_errors
            .map(|n| from_json(&n))
            .transpose()?
            .unwrap_or_default(),
        iframe_checks: Vec::new(),
        video_checks: Vec::new(),
        screenshot_ref: row.get("screenshot_ref"),
        auth_attempted: row.get("auth_attempted"),
        auth_succeeded: row.get("auth_succeeded"),
        persisted: row.get("persisted"),
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn to_json<T: serde::Serialize>(value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|e| EngineError::Internal(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> EngineResult<T> {
    serde_json::from_str(raw).map_err(|e| EngineError::Internal(e.to_string()))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// =============================================================================
// URL normalization
// =============================================================================

/// Normalize a URL for uniqueness checks: trim surrounding whitespace,
/// lowercase scheme and host, drop default ports, strip the trailing slash
/// from the path, drop the fragment. Query strings are significant and kept.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return trimmed.to_lowercase(),
    };

    let mut normalized = String::with_capacity(trimmed.len());
    normalized.push_str(parsed.scheme());
    normalized.push_str("://");
    if let Some(host) = parsed.host_str() {
        normalized.push_str(host);
    }
    if let Some(port) = parsed.port() {
        let default_port = match parsed.scheme() {
            "http" => 80,
            "https" => 443,
            _ => 0,
        };
        if port != default_port {
            normalized.push(':');
            normalized.push_str(&port.to_string());
        }
    }

    // WHATWG serialization reports "/" for a bare host, so a lone "/" counts
    // as no path at all; "https://a.com" and "https://a.com/" must collide.
    let path = parsed.path();
    if path != "/" {
        if path.ends_with('/') {
            normalized.push_str(&path[..path.len() - 1]);
        } else {
            normalized.push_str(path);
        }
    }

    if let Some(query) = parsed.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    normalized
}
