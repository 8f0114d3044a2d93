use std::future::ready;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api::{export_csv, upload_csv};
use crate::metrics::{setup_metrics_recorder, track_metrics};
use crate::store::ContactStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContactStore>,
    pub export_page_size: u64,
}

pub fn router(
    store: Arc<dyn ContactStore>,
    export_page_size: u64,
    max_upload_bytes: usize,
    enable_metrics: bool,
) -> Router {
    let state = AppState {
        store,
        export_page_size,
    };

    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(|| ready(StatusCode::OK)))
        .route("/_liveness", get(|| ready(StatusCode::OK)));

    let csv_router = Router::new()
        .route("/csv/upload", post(upload_csv))
        .route("/csv/export", get(export_csv))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    let router = Router::new()
        .merge(status_router)
        .merge(csv_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    if !enable_metrics {
        return router;
    }

    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(e) => {
            warn!("metrics recorder unavailable, not serving /metrics: {}", e);
            router
        }
    }
}

pub async fn index() -> &'static str {
    "contact import service"
}
