use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Json;
use futures::stream;
use multer::{parse_boundary, Multipart};
use serde::Serialize;
use tracing::{debug, warn};

use crate::commit::commit;
use crate::errors::ImportError;
use crate::pipeline::ingest;
use crate::router::AppState;
use crate::types::{CommitSummary, IngestionReport};

const FILE_FIELD: &str = "file";
const ACCEPTED_EXTENSIONS: [&str; 2] = [".csv", ".txt"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: IngestionReport,
    pub committed: CommitSummary,
}

/// Accepts a CSV either as the `file` part of a multipart form or as a raw
/// `text/csv` body, classifies it and persists the result.
pub async fn upload_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ImportError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let file = if content_type.starts_with("multipart/form-data") {
        let boundary = parse_boundary(content_type).map_err(|e| {
            warn!("Failed to parse boundary from Content-Type: {}", e);
            ImportError::RequestDecoding(format!("invalid boundary in Content-Type: {e}"))
        })?;
        read_file_part(body, &boundary).await?
    } else if is_plain_csv(content_type) {
        body
    } else {
        return Err(ImportError::InvalidUpload(format!(
            "unsupported content type '{content_type}'"
        )));
    };

    debug!(bytes = file.len(), "received csv upload");

    let report = ingest(&file[..], state.store.as_ref()).await?;
    let committed = commit(&report, state.store.as_ref()).await?;

    Ok(Json(UploadResponse {
        status: "success",
        report,
        committed,
    }))
}

fn is_plain_csv(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    matches!(
        mime.as_str(),
        "" | "text/csv" | "text/plain" | "application/csv" | "application/octet-stream"
    )
}

fn has_accepted_extension(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

async fn read_file_part(body: Bytes, boundary: &str) -> Result<Bytes, ImportError> {
    let body_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = Multipart::new(body_stream, boundary);

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Multipart parsing error: {}", e);
        ImportError::RequestDecoding(format!("multipart parsing failed: {e}"))
    })? {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "skipping multipart field");
            continue;
        }

        if let Some(file_name) = field.file_name() {
            if !has_accepted_extension(file_name) {
                return Err(ImportError::InvalidUpload(format!(
                    "'{file_name}' must be a csv or txt file"
                )));
            }
        }

        return field.bytes().await.map_err(|e| {
            ImportError::RequestDecoding(format!("failed to read file part: {e}"))
        });
    }

    Err(ImportError::InvalidUpload(
        "the file field is required".to_string(),
    ))
}
