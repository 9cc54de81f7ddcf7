//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use netops_state::*;
use tracing::{info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn store_error(e: StateError) -> axum::response::Response {
    match e {
        StateError::NotFound(..) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        StateError::Conflict { .. } => error_response(&e.to_string(), StatusCode::CONFLICT),
        _ => {
            warn!(error = %e, "store request failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Rollouts ───────────────────────────────────────────────────

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_rollouts() {
        Ok(rollouts) => ApiResponse::ok(rollouts).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/v1/rollouts/:namespace/:name
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_rollout(&ObjectKey::new(namespace, name)) {
        Ok(Some(rollout)) => ApiResponse::ok(rollout).into_response(),
        Ok(None) => error_response("rollout not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// POST /api/v1/rollouts/:namespace/:name/reset
///
/// Marks the rollout for a status reset; the rollout reconciler clears
/// the annotation and restarts the transaction.
pub async fn reset_rollout(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = ObjectKey::new(namespace, name);
    let result = state.store.update_rollout(&key, |rollout| {
        rollout
            .metadata
            .annotations
            .insert(RESET_STATUS_ANNOTATION.to_string(), "true".to_string());
    });
    match result {
        Ok(rollout) => {
            info!(rollout = %key, "status reset requested");
            (StatusCode::ACCEPTED, ApiResponse::ok(rollout)).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Devices ────────────────────────────────────────────────────

/// GET /api/v1/devices
pub async fn list_devices(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_devices() {
        Ok(devices) => ApiResponse::ok(devices).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/v1/devices/:namespace/:name
pub async fn get_device(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_device(&ObjectKey::new(namespace, name)) {
        Ok(Some(device)) => ApiResponse::ok(device).into_response(),
        Ok(None) => error_response("device not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// PUT /api/v1/devices/:namespace/:name
///
/// Creates the device, or replaces the spec of an existing one while
/// keeping its status.
pub async fn put_device(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(spec): Json<DeviceSpec>,
) -> impl IntoResponse {
    if spec.address.is_empty() || spec.port == 0 {
        return error_response("address and port are required", StatusCode::BAD_REQUEST);
    }
    let key = ObjectKey::new(namespace, name);
    match state.store.get_device(&key) {
        Ok(Some(_)) => match state.store.update_device(&key, |d| d.spec = spec) {
            Ok(device) => ApiResponse::ok(device).into_response(),
            Err(e) => store_error(e),
        },
        Ok(None) => {
            let device = Device::new(key.namespace.clone(), key.name.clone(), spec);
            match state.store.put_device(&device) {
                Ok(device) => {
                    info!(device = %key, "device created");
                    (StatusCode::CREATED, ApiResponse::ok(device)).into_response()
                }
                Err(e) => store_error(e),
            }
        }
        Err(e) => store_error(e),
    }
}

/// DELETE /api/v1/devices/:namespace/:name
pub async fn delete_device(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.delete_device(&ObjectKey::new(namespace, name)) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("device not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}
