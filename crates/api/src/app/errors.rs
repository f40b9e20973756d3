use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use omms_auth::AuthzError;
use omms_core::DomainError;

/// Handler-level error: a domain failure rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        Self(value)
    }
}

impl From<AuthzError> for ApiError {
    fn from(value: AuthzError) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        domain_error_to_response(self.0)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DomainError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Storage(_) | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = status_for(&err);
    match &err {
        DomainError::Storage(_) | DomainError::Internal(_) => {
            tracing::error!(error = %err, "request failed");
            // Backend detail stays in the log.
            return json_error(status, err.code(), "internal server error");
        }
        DomainError::Unauthenticated(_) | DomainError::Forbidden(_) => {
            tracing::info!(error = %err, "request denied");
        }
        _ => {}
    }
    json_error(status, err.code(), err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
