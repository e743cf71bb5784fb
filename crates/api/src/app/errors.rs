use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use warden_auth::TokenError;
use warden_infra::{DirectoryError, LedgerError, PasswordError, RotationError};

use crate::s2s_client::ClientError;

/// Everything a handler or gate can fail with.
///
/// Known failures map to a stable code; everything else collapses into
/// `Internal`, which is logged and answered with a generic 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Token(TokenError),

    #[error(transparent)]
    Rotation(RotationError),

    #[error("token is not accepted here: {0}")]
    WrongTokenType(&'static str),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("missing role {0}")]
    Forbidden(String),

    #[error("s2s token required")]
    S2sRequired,

    #[error("token is not addressed to this service")]
    AudienceMismatch,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username already taken")]
    UsernameTaken,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Token(TokenError::Encoding(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Token(_) => StatusCode::UNAUTHORIZED,
            ApiError::Rotation(err) if err.is_rejection() => StatusCode::UNAUTHORIZED,
            ApiError::Rotation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::WrongTokenType(_) | ApiError::Unauthorized(_) | ApiError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden(_) | ApiError::S2sRequired | ApiError::AudienceMismatch => {
                StatusCode::FORBIDDEN
            }
            ApiError::UsernameTaken => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            return "internal_error";
        }
        match self {
            ApiError::Token(err) => err.code(),
            ApiError::Rotation(err) => err.code(),
            ApiError::WrongTokenType(_) => "wrong_token_type",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::S2sRequired => "s2s_required",
            ApiError::AudienceMismatch => "audience_mismatch",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::UsernameTaken => "username_taken",
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            return json_error(status, "internal_error", "internal server error");
        }
        if status == StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "upstream call failed");
            return json_error(status, self.code(), "upstream service call failed");
        }
        json_error(status, self.code(), self.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::Token(err)
    }
}

impl From<RotationError> for ApiError {
    fn from(err: RotationError) -> Self {
        ApiError::Rotation(err)
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UsernameTaken(_) => ApiError::UsernameTaken,
            DirectoryError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Mismatch => ApiError::InvalidCredentials,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound => ApiError::NotFound("user not found".to_string()),
            ClientError::Token(err) => ApiError::Internal(format!("cannot mint s2s token: {err}")),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_and_rotation_failures_are_401_with_their_code() {
        let err = ApiError::from(TokenError::InvalidSignature);
        assert_eq!((err.status(), err.code()), (StatusCode::UNAUTHORIZED, "invalid_signature"));

        let err = ApiError::from(RotationError::TokenReplayed);
        assert_eq!((err.status(), err.code()), (StatusCode::UNAUTHORIZED, "token_replayed"));
    }

    #[test]
    fn trust_and_role_failures_are_403() {
        assert_eq!(ApiError::S2sRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::AudienceMismatch.code(), "audience_mismatch");
        assert_eq!(ApiError::Forbidden("ADMIN".into()).code(), "forbidden");
    }

    #[test]
    fn storage_failures_collapse_to_internal_error() {
        let err = ApiError::from(RotationError::Ledger(LedgerError::Storage("disk on fire".into())));
        assert_eq!((err.status(), err.code()), (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"));

        let err = ApiError::from(DirectoryError::Storage("gone".into()));
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn password_mismatch_is_invalid_credentials() {
        let err = ApiError::from(PasswordError::Mismatch);
        assert_eq!((err.status(), err.code()), (StatusCode::UNAUTHORIZED, "invalid_credentials"));
    }
}
