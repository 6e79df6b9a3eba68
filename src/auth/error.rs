use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the account store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Classified failures of the account lifecycle operations.
///
/// Handlers translate these to HTTP responses; anything under `Store`,
/// `Internal` or `Notification` is logged with full detail server-side and
/// reaches the client as a generic message only.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account not activated, please check your email")]
    NotActivated,
    #[error("no account found for this email")]
    NotFound,
    #[error("invalid or unknown token")]
    InvalidToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("old password is incorrect")]
    InvalidOldPassword,
    /// The store mutation succeeded but the notification email did not go out.
    /// Nothing is rolled back: the persisted token stays valid and the user can
    /// retry the request.
    #[error("could not deliver notification email")]
    Notification(#[source] anyhow::Error),
    #[error("storage failure")]
    Store(#[from] StoreError),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::NotActivated => StatusCode::UNAUTHORIZED,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidToken | AuthError::TokenExpired | AuthError::InvalidOldPassword => {
                StatusCode::BAD_REQUEST
            }
            AuthError::Notification(_) | AuthError::Store(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::NotActivated => "ACCOUNT_NOT_ACTIVATED",
            AuthError::NotFound => "NOT_FOUND",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidOldPassword => "INVALID_OLD_PASSWORD",
            AuthError::Notification(_) => "NOTIFICATION_FAILED",
            AuthError::Store(_) | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Store(e) => {
                error!(error = %e, "account store failure");
                "Something went wrong".to_string()
            }
            AuthError::Internal(e) => {
                error!(error = %e, "internal auth failure");
                "Something went wrong".to_string()
            }
            AuthError::Notification(e) => {
                error!(error = %e, "notification delivery failure");
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
