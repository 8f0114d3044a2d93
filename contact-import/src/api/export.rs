use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::{error, info};

use crate::errors::ImportError;
use crate::export::{export_file_name, export_stream};
use crate::router::AppState;
use crate::types::ExportCategory;

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    #[serde(rename = "type")]
    pub category: Option<ExportCategory>,
}

/// Streams the requested category as a CSV attachment. An omitted `type`
/// exports duplicates; an unknown one is a request decoding error.
pub async fn export_csv(
    State(state): State<AppState>,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> Result<Response, ImportError> {
    let Query(params) = params.map_err(|e| ImportError::RequestDecoding(e.body_text()))?;
    let category = params.category.unwrap_or(ExportCategory::Duplicates);
    let file_name = export_file_name(category, Utc::now());
    info!(category = category.as_str(), file_name = %file_name, "starting csv export");

    let stream = export_stream(state.store.clone(), category, state.export_page_size)
        .inspect_err(move |e| {
            error!(category = category.as_str(), "export aborted mid-stream: {}", e);
        });

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
