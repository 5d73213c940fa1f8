pub mod config;
pub mod error;
pub mod modules;
pub mod services;
pub mod store;

use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use modules::auth::auth_routes;
use modules::device::{device_routes, session_routes};
use services::cache::Cache;
use services::codes::{CodeHasher, CodeSender};
use services::fingerprint::TrustedProxies;
use services::jwt::JwtService;
use services::rate_limit::{create_rate_limiter, RateLimitLayer};
use services::security::security_headers;
use services::social::SocialProvider;
use store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub jwt_service: JwtService,
    pub code_hasher: CodeHasher,
    pub code_sender: Arc<dyn CodeSender>,
    pub social: Arc<dyn SocialProvider>,
    pub rate_limit_burst: u32,
    pub trusted_proxies: TrustedProxies,
}

pub fn create_app(state: AppState) -> Router {
    let rate_limiter = create_rate_limiter(state.rate_limit_burst);
    let state = Arc::new(state);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/auth", auth_routes())
        .nest("/devices", device_routes())
        .nest("/sessions", session_routes())
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(1024 * 100)) // 100KB max body
        .layer(RateLimitLayer::new(rate_limiter))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "Account Guard API"
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
