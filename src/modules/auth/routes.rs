use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;
use super::controller;

pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(controller::register))
        .route("/login", post(controller::login))
        .route("/social/{provider}/callback", get(controller::social_callback))
        .route("/social/complete", post(controller::social_complete))
        .route("/2fa/request", post(controller::request_two_factor_code))
        .route("/2fa/verify", post(controller::verify_two_factor))
        .route("/2fa/enable", post(controller::enable_two_factor))
        .route("/2fa/confirm", post(controller::confirm_two_factor))
        .route("/2fa/disable", post(controller::disable_two_factor))
        .route("/refresh", post(controller::refresh_token))
        .route("/logout", post(controller::logout))
        .route("/me", get(controller::me))
        .route("/security", get(controller::security_overview))
        .route(
            "/recovery-methods",
            get(controller::list_recovery_methods).post(controller::add_recovery_method),
        )
        .route(
            "/recovery-methods/{id}/verify",
            post(controller::verify_recovery_method),
        )
        .route(
            "/recovery-methods/{id}",
            delete(controller::delete_recovery_method),
        )
        .route("/passkeys", post(controller::register_passkey))
}
