//! HTTP and WebSocket surface
//!
//! Serves the registry mutation/query API and the push channel. Every JSON
//! response uses the `{success, data?, error?, count?}` envelope; engine
//! error kinds map onto HTTP statuses here and nowhere else.

pub mod routes;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::monitor_events::MonitorEventBus;
use crate::registry::RegistryService;
use crate::scheduler::Scheduler;
use crate::url_store::UrlStore;

/// Shared handler state, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryService,
    pub store: UrlStore,
    pub scheduler: Arc<Scheduler>,
    pub bus: MonitorEventBus,
    pub config: Arc<EngineConfig>,
    pub started_at: Instant,
}

/// Build the full router with tracing and permissive CORS (the dashboard is
/// served from another origin).
pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/urls", get(routes::list_urls).post(routes::create_url))
        .route(
            "/urls/:id",
            get(routes::get_url)
                .put(routes::update_url)
                .delete(routes::delete_url),
        )
        .route("/urls/:id/check", post(routes::check_url))
        .route("/urls/check-all", post(routes::check_all))
        .route("/history/:id", get(routes::probe_history))
        .route("/health", get(routes::health))
        .route("/ws", get(ws::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Response envelope
// =============================================================================

/// Machine-readable error body inside the envelope.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// The `{success, data?, error?, count?}` envelope every endpoint returns.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            count: None,
        }
    }

    #[must_use]
    pub fn ok_with_count(data: T, count: usize) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            count: Some(count),
        }
    }
}

// =============================================================================
// Error mapping
// =============================================================================

/// Engine error carried into the HTTP layer.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) | EngineError::VersionConflict { .. } => StatusCode::CONFLICT,
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::DatabaseUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code: self.0.code(),
                message: self.0.to_string(),
            }),
            count: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Gate for mutating endpoints: when an API token is configured, callers
/// must present it as a bearer token.
pub(crate) fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.api_token() else {
        return Ok(());
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError(EngineError::Unauthorized))
    }
}
