use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::chat::friends::FriendError;
use crate::chat::messages::StoreError;
use crate::core::auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Auth Errors
    #[error("Invalid credentials")]
    LoginFail,
    #[error("No token provided")]
    AuthFailNoToken,
    #[error("Invalid or expired token")]
    AuthFailTokenInvalid,
    #[error("Auth context missing")]
    AuthFailCtxNotInRequestExt,

    // Model Errors
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),

    // Generic
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::LoginFail | Error::AuthFailNoToken | Error::AuthFailTokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Error::AuthFailCtxNotInRequestExt | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let message = match &self {
            Error::Internal(detail) => {
                error!(detail = %detail, "internal error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Error::LoginFail,
            AuthError::InvalidSession => Error::AuthFailTokenInvalid,
            AuthError::UserNotFound => Error::NotFound(err.to_string()),
            AuthError::Validation(msg) => Error::BadRequest(msg),
            AuthError::EmailTaken | AuthError::UsernameTaken => Error::BadRequest(err.to_string()),
            AuthError::Database(e) => Error::Internal(e.to_string()),
            AuthError::Hash(e) => Error::Internal(e),
        }
    }
}

impl From<FriendError> for Error {
    fn from(err: FriendError) -> Self {
        match err {
            FriendError::UserNotFound
            | FriendError::RequestNotFound
            | FriendError::FriendshipNotFound => Error::NotFound(err.to_string()),
            FriendError::NotRecipient(_) => Error::Forbidden(err.to_string()),
            FriendError::Database(e) => Error::Internal(e.to_string()),
            FriendError::SelfRequest
            | FriendError::AlreadyFriends
            | FriendError::AlreadyPending
            | FriendError::NotPending
            | FriendError::EmptyQuery => Error::BadRequest(err.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Error::BadRequest(msg),
            StoreError::UnknownUser(_) | StoreError::UnknownMessage(_) => {
                Error::NotFound(err.to_string())
            }
            StoreError::Database(e) => Error::Internal(e.to_string()),
            StoreError::Unavailable(msg) => Error::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::AuthFailNoToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::NotFound("User not found".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::from(FriendError::NotRecipient("accept")).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::from(StoreError::Validation("too long".into()))
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
