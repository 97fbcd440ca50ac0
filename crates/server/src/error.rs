//! Mapping store errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::StoreError;
use std::str::Utf8Error;
use thiserror::Error;
use tracing::warn;

/// Failure of a single shim request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("request body is not UTF-8: {0}")]
    Body(#[from] Utf8Error),
}

/// Status code for a failed request.
///
/// Every failure is reported as a client error; the body carries the detail.
pub fn map_error_to_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Store(
            StoreError::Classification { .. }
            | StoreError::Execution(_)
            | StoreError::Pipe(_)
            | StoreError::Closed
            | StoreError::Io(_),
        )
        | ApiError::Body(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        warn!(error = %message, "request failed");
        (map_error_to_status(&self), format!("{message}\n")).into_response()
    }
}
