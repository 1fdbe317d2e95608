//! Registry API handlers
//!
//! Thin translation between HTTP and the registry service: handlers
//! deserialize, authorize, delegate, and wrap results in the response
//! envelope. Secrets never appear in any view returned here.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResponse, AppState, authorize};
use crate::model::{AuthView, MonitoredUrl, NewUrl, ProbeResult, UrlPatch};
use crate::url_store::UrlFilter;

/// Read view of a registry entry: the stored fields (whose serializer skips
/// the raw auth config) plus a secret-free auth summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlView {
    #[serde(flatten)]
    entry: MonitoredUrl,
    requires_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<AuthView>,
}

impl From<MonitoredUrl> for UrlView {
    fn from(entry: MonitoredUrl) -> Self {
        let auth = entry.auth.as_ref().map(AuthView::from);
        Self {
            requires_auth: entry.auth.is_some(),
            auth,
            entry,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// `GET /urls`: list entries with their latest status fields. Stale entries
/// are opportunistically redispatched in the background.
pub async fn list_urls(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<UrlView>>>, ApiError> {
    let entries = state.registry.list(&UrlFilter::default()).await?;
    state.scheduler.refresh_stale(&entries);

    let count = entries.len();
    let views: Vec<UrlView> = entries.into_iter().map(UrlView::from).collect();
    Ok(Json(ApiResponse::ok_with_count(views, count)))
}

/// `GET /urls/:id`
pub async fn get_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<UrlView>>, ApiError> {
    let entry = state.registry.get(&id).await?;
    Ok(Json(ApiResponse::ok(UrlView::from(entry))))
}

/// `POST /urls`: 201 on success, 400 on validation, 409 on conflict.
pub async fn create_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<NewUrl>,
) -> Result<(StatusCode, Json<ApiResponse<UrlView>>), ApiError> {
    authorize(&state, &headers)?;
    let entry = state.registry.add_url(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(UrlView::from(entry))),
    ))
}

/// `PUT /urls/:id`: partial update.
pub async fn update_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<UrlPatch>,
) -> Result<Json<ApiResponse<UrlView>>, ApiError> {
    authorize(&state, &headers)?;
    let entry = state.registry.update_url(&id, patch).await?;
    Ok(Json(ApiResponse::ok(UrlView::from(entry))))
}

/// `DELETE /urls/:id`
pub async fn delete_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    authorize(&state, &headers)?;
    state.registry.remove_url(&id).await?;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "id": id }))))
}

/// `POST /urls/:id/check`: synchronous dispatch returning the new result.
pub async fn check_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ProbeResult>>, ApiError> {
    authorize(&state, &headers)?;
    let result = state.registry.check_now(&id).await?;
    Ok(Json(ApiResponse::ok(result)))
}

/// `POST /urls/check-all`: dispatch every enabled entry.
pub async fn check_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<ProbeResult>>>, ApiError> {
    authorize(&state, &headers)?;
    let results = state.registry.check_all().await?;
    let count = results.len();
    Ok(Json(ApiResponse::ok_with_count(results, count)))
}

/// `GET /history/:id?limit=N`: last N probe records, newest first.
pub async fn probe_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<ProbeResult>>>, ApiError> {
    // 404 for unknown ids rather than an empty history.
    state.registry.get(&id).await?;

    let limit = query.limit.unwrap_or(100).clamp(1, 1_000);
    let records = state.store.probe_history(&id, limit).await?;
    let count = records.len();
    Ok(Json(ApiResponse::ok_with_count(records, count)))
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<Utc>,
    pub uptime: u64,
    pub database: &'static str,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthBody>> {
    let database_up = state.store.ping().await;
    let body = HealthBody {
        status: if database_up { "ok" } else { "degraded" },
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs(),
        database: if database_up { "connected" } else { "disconnected" },
    };
    Json(ApiResponse::ok(body))
}
