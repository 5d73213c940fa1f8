use axum::{
    routing::{delete, get, put},
    Router,
};
use std::sync::Arc;

use crate::AppState;
use super::controller;

pub fn device_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(controller::list_devices))
        .route("/{id}/trust", put(controller::set_trust))
}

pub fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(controller::list_sessions))
        .route("/{id}", delete(controller::revoke_session))
        .route("/{id}/revoke-at", put(controller::schedule_revocation))
}
