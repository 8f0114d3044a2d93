use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ImportError {
    /// Header missing or the input could not be read. Nothing was processed.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The upload itself was rejected before parsing.
    #[error("Invalid file upload: {0}")]
    InvalidUpload(String),

    #[error("failed to decode request: {0}")]
    RequestDecoding(String),

    /// An existence or resolution lookup failed. The whole call is aborted.
    #[error("store query failed: {0}")]
    StoreQuery(StoreError),

    /// An insert failed. The commit must be treated as not applied.
    #[error("store write failed: {0}")]
    StoreWrite(StoreError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("export read failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl ImportError {
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            ImportError::MalformedInput(_) => ("malformed_input", StatusCode::UNPROCESSABLE_ENTITY),
            ImportError::InvalidUpload(_) => ("invalid_upload", StatusCode::UNPROCESSABLE_ENTITY),
            ImportError::RequestDecoding(_) => ("request_decoding_error", StatusCode::BAD_REQUEST),
            ImportError::StoreQuery(_) => ("store_query_error", StatusCode::SERVICE_UNAVAILABLE),
            ImportError::StoreWrite(StoreError::UniqueViolation(_)) => {
                ("store_conflict", StatusCode::CONFLICT)
            }
            ImportError::StoreWrite(_) => ("store_write_error", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_metadata().1
    }
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        let (code, status) = self.error_metadata();
        if status.is_server_error() || status == StatusCode::CONFLICT {
            tracing::error!(error = %self, code, "import failed");
        } else {
            tracing::warn!(error = %self, code, "import rejected");
        }

        (
            status,
            Json(ErrorResponse {
                status: "error",
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ImportError::MalformedInput("no header".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ImportError::StoreQuery(StoreError::PoolExhausted).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ImportError::StoreWrite(StoreError::UniqueViolation("dup".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ImportError::StoreWrite(StoreError::Write("boom".into())).error_code(),
            "store_write_error"
        );
    }
}
