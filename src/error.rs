//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the error type of the stationboard surface. Each variant
//! maps to an HTTP status code and a stable machine-readable `error` code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::stop_identity::IdentityConflict;

/// Structured JSON error response body.
///
/// All error responses follow this shape, with variant-specific fields
/// flattened next to `error` and `message`:
/// ```json
/// {
///   "error": "stop_not_found",
///   "message": "stop not found: 8501120",
///   "tried": ["8501120"]
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Variant-specific fields.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// | Code                   | HTTP Status |
/// |------------------------|-------------|
/// | `invalid_query`        | 400         |
/// | `missing_stop_id`      | 400         |
/// | `conflicting_stop_id`  | 400         |
/// | `invalid_since_rt`     | 400         |
/// | `unknown_stop`         | 400         |
/// | `stop_not_found`       | 404         |
/// | `stationboard_timeout` | 504         |
/// | `stationboard_failed`  | 500         |
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The query string could not be decoded.
    #[error("invalid query string: {0}")]
    InvalidQuery(String),

    /// Neither `stop_id` nor `stationId` was supplied.
    #[error("stop_id or stationId is required")]
    MissingStopId,

    /// `stop_id` and `stationId` name different stops.
    #[error("stop_id and stationId resolve to different stops")]
    ConflictingStopId(Box<IdentityConflict>),

    /// `since_rt` is not a timestamp.
    #[error("since_rt is not a valid timestamp: {0}")]
    InvalidSinceRt(String),

    /// Stop id rejected by the resolver or builder.
    #[error("unknown stop: {stop_id}")]
    UnknownStop {
        /// Requested stop.
        stop_id: String,
        /// Identifiers that were looked up.
        tried: Vec<String>,
    },

    /// Stop not present in the static store.
    #[error("stop not found: {stop_id}")]
    StopNotFound {
        /// Requested stop.
        stop_id: String,
        /// Identifiers that were looked up.
        tried: Vec<String>,
        /// Diagnostics, only populated when the client asked for them.
        details: Option<serde_json::Value>,
    },

    /// The builder missed its deadline and no usable cache entry existed.
    #[error("stationboard build timed out after {timeout_ms} ms")]
    Timeout {
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// Unexpected internal failure.
    #[error("stationboard failed")]
    Failed {
        /// Underlying cause, exposed only in development.
        detail: Option<String>,
    },
}

impl ApiError {
    /// Returns the stable machine-readable code for this variant.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::MissingStopId => "missing_stop_id",
            Self::ConflictingStopId(_) => "conflicting_stop_id",
            Self::InvalidSinceRt(_) => "invalid_since_rt",
            Self::UnknownStop { .. } => "unknown_stop",
            Self::StopNotFound { .. } => "stop_not_found",
            Self::Timeout { .. } => "stationboard_timeout",
            Self::Failed { .. } => "stationboard_failed",
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidQuery(_)
            | Self::MissingStopId
            | Self::ConflictingStopId(_)
            | Self::InvalidSinceRt(_)
            | Self::UnknownStop { .. } => StatusCode::BAD_REQUEST,
            Self::StopNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Builds the JSON body for this error.
    #[must_use]
    pub fn body(&self) -> ErrorResponse {
        let mut extra = serde_json::Map::new();
        match self {
            Self::ConflictingStopId(conflict) => {
                if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(conflict) {
                    extra.extend(fields);
                }
            }
            Self::InvalidSinceRt(raw) => {
                extra.insert("since_rt".to_string(), raw.clone().into());
            }
            Self::UnknownStop { stop_id, tried } => {
                extra.insert("stop_id".to_string(), stop_id.clone().into());
                extra.insert("tried".to_string(), tried.clone().into());
            }
            Self::StopNotFound {
                stop_id,
                tried,
                details,
            } => {
                extra.insert("stop_id".to_string(), stop_id.clone().into());
                extra.insert("tried".to_string(), tried.clone().into());
                if let Some(details) = details {
                    extra.insert("details".to_string(), details.clone());
                }
            }
            Self::Timeout { timeout_ms } => {
                extra.insert("timeout_ms".to_string(), (*timeout_ms).into());
            }
            Self::Failed {
                detail: Some(detail),
            } => {
                extra.insert("detail".to_string(), detail.clone().into());
            }
            Self::InvalidQuery(_) | Self::MissingStopId | Self::Failed { detail: None } => {}
        }

        ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            extra,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = axum::Json(self.body()).into_response();
        *response.status_mut() = status;
        response
    }
}
