use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::{auth::AuthError, storage::StorageError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Storage(e) => match e {
                StorageError::Validation(_) => StatusCode::BAD_REQUEST,
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::IOError(_)
                | StorageError::Serialization(_)
                | StorageError::Remote(_)
                | StorageError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Auth(e) => match e {
                AuthError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
                AuthError::InvalidState => StatusCode::BAD_REQUEST,
                AuthError::Exchange(_)
                | AuthError::Config(_)
                | AuthError::IOError(_)
                | AuthError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        metrics::increment_counter!("expin_http_errors_total", "status" => status.as_u16().to_string());

        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(StorageError::Validation("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(StorageError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (
                ApiError::from(StorageError::IOError(std::io::Error::new(std::io::ErrorKind::Other, "disk"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::from(StorageError::Remote("drive".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::from(AuthError::NotAuthorized("x".into())), StatusCode::UNAUTHORIZED),
            (ApiError::from(AuthError::InvalidState), StatusCode::BAD_REQUEST),
            (ApiError::from(AuthError::Exchange("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Internal("join".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{:?}", err);
        }
    }
}
