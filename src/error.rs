//! Crate-wide error type (§7).
//!
//! Every variant maps 1:1 to one abstract error kind (§7), and carries its
//! own HTTP status mapping so the axum boundary (`server::routes`) never has
//! to re-derive the mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Crate-wide error type. See module docs for the kind → HTTP status mapping.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad request shape: empty query, non-positive max, malformed filter JSON.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `previous_response_id` referenced a response this store never saw.
    #[error("previous response not found: {0}")]
    PreviousResponseNotFound(String),

    /// The per-request tool-call loop exceeded its configured bound.
    #[error("max tool calls exceeded (limit {limit})")]
    MaxToolCallsExceeded {
        /// The configured limit that was exceeded.
        limit: usize,
    },

    /// The upstream LLM provider call failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A filter failed to evaluate against a candidate's metadata.
    ///
    /// Never silently dropped — per §4.1, a filter error must abort the
    /// search rather than risk leaking results across tenancy boundaries.
    #[error("filter application failed: {0}")]
    FilterApplicationFailed(String),

    /// The input-item store (or vector/chunk store) failed a read or write.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Serialization/deserialization of a JSON payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// The machine-readable error code surfaced in the JSON error body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::PreviousResponseNotFound(_) => "previous_response_not_found",
            Self::MaxToolCallsExceeded { .. } => "max_tool_calls_exceeded",
            Self::Upstream(_) => "upstream_error",
            Self::FilterApplicationFailed(_) => "filter_application_failed",
            Self::Storage(_) => "storage_failure",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// The HTTP status this error kind maps to (§7, expanded in `SPEC_FULL.md` §7).
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::FilterApplicationFailed(_) | Self::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PreviousResponseNotFound(_) => StatusCode::NOT_FOUND,
            Self::MaxToolCallsExceeded { .. } => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
