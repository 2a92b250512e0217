//! Error kinds and their HTTP mapping. The HTTP edge is the sole place
//! that maps a kind to a status code — services only ever produce an
//! `ApiError`, never a raw status.

use r2e::http::StatusCode;
use r2e::prelude::{IntoResponse, Json, Response};

#[derive(Debug, Clone)]
pub enum ApiError {
    Validation(String),
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    QueueUnavailable(String),
    StorageUnavailable(String),
    UpstreamUnavailable(String),
    SignatureInvalid(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// The kind alone, with no message — e.g. used for the wire format the
    /// batch endpoint documents for `errors[].message` (§8 scenario 2).
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::QueueUnavailable(_) => "queue_unavailable",
            ApiError::StorageUnavailable(_) => "storage_unavailable",
            ApiError::UpstreamUnavailable(_) => "upstream_unavailable",
            ApiError::SignatureInvalid(_) => "signature_invalid",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::StorageUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Validation(m)
            | ApiError::Unauthenticated(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::QueueUnavailable(m)
            | ApiError::StorageUnavailable(m)
            | ApiError::UpstreamUnavailable(m)
            | ApiError::SignatureInvalid(m)
            | ApiError::ServiceUnavailable(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Never leak raw vendor payloads or secrets in the message body.
        let body = serde_json::json!({
            "error": self.message(),
            "kind": self.kind(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::QueueUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::UpstreamUnavailable(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_status_mapping_matches_the_contract_table() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthenticated("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::QueueUnavailable("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::StorageUnavailable("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::UpstreamUnavailable("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::SignatureInvalid("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::ServiceUnavailable("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn kind_reports_the_tag_alone_with_no_message() {
        assert_eq!(ApiError::Forbidden("project not found".into()).kind(), "forbidden");
    }
}
