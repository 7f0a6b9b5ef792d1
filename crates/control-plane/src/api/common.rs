// Common DTOs for public API
//
// These types are shared across multiple API endpoints.

use axum::http::StatusCode;
use axum::Json;
use parley_core::ParleyError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a service error to its HTTP status and body
pub fn error_response(err: ParleyError) -> ApiError {
    let status = match &err {
        ParleyError::ProviderUnconfigured(_) | ParleyError::ProviderMisconfigured(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ParleyError::ModelNotFound(_) | ParleyError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
        ParleyError::Upstream { .. }
        | ParleyError::ModelCatalogFetch(_)
        | ParleyError::StreamInterrupted => StatusCode::BAD_GATEWAY,
        ParleyError::Validation(_) => StatusCode::BAD_REQUEST,
        ParleyError::Conflict(_) => StatusCode::CONFLICT,
        ParleyError::Credential(message) => {
            return ErrorResponse::new(message.clone())
                .into_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
        ParleyError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ParleyError::Internal(e) => {
            tracing::error!("Internal error: {:#}", e);
            return ErrorResponse::new("Internal server error")
                .into_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    ErrorResponse::new(err.to_string()).into_response(status)
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        let cases = [
            (ParleyError::unconfigured("openai"), StatusCode::UNPROCESSABLE_ENTITY),
            (ParleyError::model_not_found("x"), StatusCode::NOT_FOUND),
            (ParleyError::upstream("openai", "boom"), StatusCode::BAD_GATEWAY),
            (ParleyError::validation("bad"), StatusCode::BAD_REQUEST),
            (ParleyError::conflict("dup"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(error_response(err).0, status);
        }
    }

    #[test]
    fn test_internal_error_is_not_leaked() {
        let (status, Json(body)) =
            error_response(ParleyError::Internal(anyhow::anyhow!("pool timed out")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal server error");
    }
}
