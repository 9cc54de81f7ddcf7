//! netops-api — admin REST API over the object store.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/rollouts` | List rollouts |
//! | GET | `/api/v1/rollouts/{namespace}/{name}` | Get a rollout |
//! | POST | `/api/v1/rollouts/{namespace}/{name}/reset` | Request a status reset |
//! | GET | `/api/v1/devices` | List devices |
//! | GET | `/api/v1/devices/{namespace}/{name}` | Get a device |
//! | PUT | `/api/v1/devices/{namespace}/{name}` | Create or update a device spec |
//! | DELETE | `/api/v1/devices/{namespace}/{name}` | Delete a device |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use netops_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

/// Build the admin router.
pub fn build_router(store: StateStore) -> Router {
    let api_routes = Router::new()
        .route("/rollouts", get(handlers::list_rollouts))
        .route("/rollouts/{namespace}/{name}", get(handlers::get_rollout))
        .route("/rollouts/{namespace}/{name}/reset", post(handlers::reset_rollout))
        .route("/devices", get(handlers::list_devices))
        .route(
            "/devices/{namespace}/{name}",
            get(handlers::get_device)
                .put(handlers::put_device)
                .delete(handlers::delete_device),
        )
        .with_state(ApiState { store });

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
