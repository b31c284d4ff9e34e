use application::{ApplicationError, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        // 常见领域错误给出具体的错误码，其余按分类映射
        let specific = match &error {
            ApplicationError::Domain(DomainError::UserAlreadyExists) => Some("USER_EXISTS"),
            ApplicationError::Domain(DomainError::EmailAlreadyExists) => Some("EMAIL_EXISTS"),
            ApplicationError::Domain(DomainError::ChatAlreadyExists) => Some("CHAT_EXISTS"),
            ApplicationError::Domain(DomainError::ChatNotFound) => Some("CHAT_NOT_FOUND"),
            ApplicationError::Domain(DomainError::UserNotFound) => Some("USER_NOT_FOUND"),
            ApplicationError::Domain(DomainError::ParticipantNotFound { .. }) => {
                Some("PARTICIPANT_NOT_FOUND")
            }
            ApplicationError::Domain(DomainError::SenderNotParticipant { .. }) => {
                Some("NOT_PARTICIPANT")
            }
            _ => None,
        };

        let (status, code) = match error.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            ErrorKind::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED"),
            ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "AUTHORIZATION_FAILED"),
            ErrorKind::Internal => {
                tracing::error!(error = %error, "请求处理失败");
                return ApiError::internal_server_error("internal server error");
            }
        };

        ApiError::new(status, specific.unwrap_or(code), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
