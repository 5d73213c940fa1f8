use std::net::SocketAddr;
use std::sync::Arc;

use account_guard::config::environment::{Config, StoreBackend};
use account_guard::config::init_db;
use account_guard::services::cache::{Cache, MemoryCache, RedisCache};
use account_guard::services::codes::{CodeHasher, LogCodeSender};
use account_guard::services::jwt::JwtService;
use account_guard::services::social::OAuthClient;
use account_guard::store::{MemoryStore, MySqlStore, Store};
use account_guard::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_guard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = Config::from_env()?;

    let (store, cache): (Arc<dyn Store>, Arc<dyn Cache>) = match config.store_backend {
        StoreBackend::MySql => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| "DATABASE_URL must be set".to_string())?;
            let db = init_db(url).await.map_err(|e| format!("database: {}", e))?;
            tracing::info!("Connected to MySQL");

            let cache = RedisCache::connect(&config.redis_url)
                .await
                .map_err(|e| format!("redis: {}", e))?;
            tracing::info!("Connected to Redis");

            let store: Arc<dyn Store> = Arc::new(MySqlStore::new(db));
            let cache: Arc<dyn Cache> = Arc::new(cache);
            (store, cache)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store and cache; data is lost on restart");
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
            (store, cache)
        }
    };

    let providers: Vec<&str> = config.oauth_providers.iter().map(|p| p.name.as_str()).collect();
    tracing::info!(?providers, "OAuth providers configured");
    tracing::info!(trusted_proxies = ?config.trusted_proxies, "client address policy");

    let state = AppState {
        store,
        cache,
        jwt_service: JwtService::new(config.jwt_secret.clone()),
        code_hasher: CodeHasher::new(&config.code_secret),
        code_sender: Arc::new(LogCodeSender),
        social: Arc::new(OAuthClient::new(
            reqwest::Client::new(),
            config.oauth_providers.clone(),
        )),
        rate_limit_burst: config.rate_limit_burst,
        trusted_proxies: config.trusted_proxies.clone(),
    };

    let app = account_guard::create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| format!("bind {}: {}", config.bind_addr, e))?;
    tracing::info!("Server running on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| format!("serve: {}", e))
}
