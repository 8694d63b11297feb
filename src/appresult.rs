use axum::{http::StatusCode, response::{IntoResponse, Response}};

use crate::auth::VerifyError;

/// Failures this service distinguishes on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] VerifyError),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store invariant violated: {0}")]
    StoreInvariant(String),

    #[error("internal error")]
    Internal,
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        use ChatError::*;
        match self {
            Authentication(_) => StatusCode::UNAUTHORIZED,
            Authorization(_) => StatusCode::FORBIDDEN,
            NotFound(_) => StatusCode::NOT_FOUND,
            StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BadRequest(_) => StatusCode::BAD_REQUEST,
            StoreInvariant(_) | Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::StoreUnavailable(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn chat_error(&self) -> Option<&ChatError> {
        self.0.downcast_ref::<ChatError>()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.chat_error() {
            Some(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                (status, err.to_string()).into_response()
            }
            None => {
                tracing::error!(error = ?self.0, "unhandled error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        Self(anyhow::Error::from(err))
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        ChatError::from(err).into()
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! store_err_impl {
    ($E:ty) => {
        impl From<$E> for ChatError {
            fn from(err: $E) -> Self {
                ChatError::StoreUnavailable(anyhow::Error::from(err))
            }
        }

        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                ChatError::from(err).into()
            }
        }
    };
}

store_err_impl!(sqlx::Error);
store_err_impl!(redis::RedisError);

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self(anyhow::Error::from(err))
    }
}
