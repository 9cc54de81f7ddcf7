//! `POST /commit` ingest endpoint.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A device's current config, posted by its subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveConfigRequest {
    pub device: String,
    pub config: String,
}

#[derive(Clone)]
struct IngestState {
    queue: mpsc::Sender<SaveConfigRequest>,
}

/// Router serving `POST /commit`; accepted requests go to `queue`.
pub fn router(queue: mpsc::Sender<SaveConfigRequest>) -> Router {
    Router::new()
        .route("/commit", post(commit))
        .with_state(IngestState { queue })
}

async fn commit(
    State(state): State<IngestState>,
    body: Result<Json<SaveConfigRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => return (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
    };
    if req.device.is_empty() || req.config.is_empty() {
        return (StatusCode::BAD_REQUEST, "device and config are required").into_response();
    }

    let device = req.device.clone();
    match state.queue.send(req).await {
        Ok(()) => {
            debug!(device = %device, "config queued");
            StatusCode::OK.into_response()
        }
        Err(_) => {
            warn!(device = %device, "save queue closed");
            (StatusCode::INTERNAL_SERVER_ERROR, "save queue closed").into_response()
        }
    }
}
