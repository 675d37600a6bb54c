//! HTTP error type shared by the route handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::database::QueryError;
use crate::database::error::{
    CODE_CONNECTION, CODE_DATATYPE_MISMATCH, CODE_INVALID_NAME, CODE_UNIQUE_VIOLATION,
};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database is not available")]
    Unavailable,

    #[error("Query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailTaken => ApiError::Conflict(err.to_string()),
            AuthError::InvalidEmail | AuthError::EmptyPassword => {
                ApiError::BadRequest(err.to_string())
            }
            AuthError::Store(e) => ApiError::Query(e),
            AuthError::Hash(_) | AuthError::Token(_) => ApiError::Internal(err.to_string()),
        }
    }
}

fn query_status(err: &QueryError) -> StatusCode {
    match err.code.as_deref() {
        Some(CODE_UNIQUE_VIOLATION) => StatusCode::CONFLICT,
        Some(CODE_CONNECTION) => StatusCode::SERVICE_UNAVAILABLE,
        // Data exceptions and integrity violations are the caller's input
        Some(code)
            if code.starts_with("22")
                || code.starts_with("23")
                || code == CODE_INVALID_NAME
                || code == CODE_DATATYPE_MISMATCH =>
        {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, code) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), None),
            ApiError::Query(e) => {
                let status = query_status(e);
                if status.is_server_error() {
                    tracing::error!("Query error: {} ({:?})", e.message, e.code);
                }
                (status, e.message.clone(), e.code.clone())
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), None)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::CODE_INVALID_PARAMETER;

    #[test]
    fn test_query_error_status_mapping() {
        let conflict = QueryError::new("dup", CODE_UNIQUE_VIOLATION);
        assert_eq!(query_status(&conflict), StatusCode::CONFLICT);

        let invalid = QueryError::new("bad", CODE_INVALID_PARAMETER);
        assert_eq!(query_status(&invalid), StatusCode::BAD_REQUEST);

        let down = QueryError::new("down", CODE_CONNECTION);
        assert_eq!(query_status(&down), StatusCode::SERVICE_UNAVAILABLE);

        let mismatch = QueryError::new("wrong type", CODE_DATATYPE_MISMATCH);
        assert_eq!(query_status(&mismatch), StatusCode::BAD_REQUEST);

        let syntax = QueryError::new("syntax", "42601");
        assert_eq!(query_status(&syntax), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_auth_errors_map_to_http() {
        assert!(matches!(ApiError::from(AuthError::EmailTaken), ApiError::Conflict(_)));
        assert!(matches!(ApiError::from(AuthError::InvalidEmail), ApiError::BadRequest(_)));
        assert_eq!(
            ApiError::from(AuthError::EmptyPassword).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
