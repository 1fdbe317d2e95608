//! Engine error kinds
//!
//! This module defines the closed set of error conditions surfaced by the
//! store, registry, and API layers. Probe-level failures are never errors:
//! they are classified into the status taxonomy and travel as results.

/// Error kinds for registry and store operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Input failed validation (bad name, URL, group, or dependency set)
    #[error("validation failed: {0}")]
    Validation(String),

    /// No entry with the requested id
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique field (normalized URL or name) collides with an existing entry
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic-concurrency write lost the race; caller should refetch and retry
    #[error("version conflict on {id}: expected version {expected}")]
    VersionConflict { id: String, expected: i64 },

    /// Missing or invalid credentials on a protected surface
    #[error("unauthorized")]
    Unauthorized,

    /// The backing database is unreachable or failed mid-operation
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// Anything that should not happen in a healthy process
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code used in API error envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::DatabaseUnavailable(_) => "DATABASE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::DatabaseUnavailable(e.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
