use std::env;

use crate::services::fingerprint::TrustedProxies;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    MySql,
    Memory,
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_url: String,
    pub userinfo_url: String,
}

/// Environment configuration
/// Loads and validates environment variables
pub struct Config {
    pub database_url: Option<String>,
    pub redis_url: String,
    pub jwt_secret: String,
    pub code_secret: String,
    pub bind_addr: String,
    pub rate_limit_burst: u32,
    pub trusted_proxies: TrustedProxies,
    pub store_backend: StoreBackend,
    pub oauth_providers: Vec<OAuthProviderConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("mysql") | Err(_) => StoreBackend::MySql,
            Ok(other) => return Err(format!("STORE_BACKEND must be mysql or memory, got {}", other)),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::MySql && database_url.is_none() {
            return Err("DATABASE_URL must be set".to_string());
        }

        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| "JWT_SECRET must be set".to_string())?;

        let code_secret = env::var("CODE_SECRET")
            .map_err(|_| "CODE_SECRET must be set".to_string())?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let rate_limit_burst = match env::var("RATE_LIMIT_BURST") {
            Ok(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| "RATE_LIMIT_BURST must be a positive integer".to_string())?,
            Err(_) => 60,
        };

        let trusted_proxies = TrustedProxies::parse(&env::var("TRUSTED_PROXIES").unwrap_or_default())?;

        let oauth_providers = [
            (
                "google",
                "https://oauth2.googleapis.com/token",
                "https://openidconnect.googleapis.com/v1/userinfo",
            ),
            (
                "github",
                "https://github.com/login/oauth/access_token",
                "https://api.github.com/user",
            ),
        ]
        .into_iter()
        .filter_map(|(name, token_url, userinfo_url)| load_provider(name, token_url, userinfo_url))
        .collect();

        Ok(Self {
            database_url,
            redis_url,
            jwt_secret,
            code_secret,
            bind_addr,
            rate_limit_burst,
            trusted_proxies,
            store_backend,
            oauth_providers,
        })
    }
}

/// A provider is enabled once its client id and secret are present.
fn load_provider(name: &str, token_url: &str, userinfo_url: &str) -> Option<OAuthProviderConfig> {
    let prefix = format!("OAUTH_{}", name.to_uppercase());
    let client_id = env::var(format!("{}_CLIENT_ID", prefix)).ok()?;
    let client_secret = env::var(format!("{}_CLIENT_SECRET", prefix)).ok()?;
    let redirect_uri = env::var(format!("{}_REDIRECT_URI", prefix)).unwrap_or_else(|_| {
        format!("http://localhost:3000/auth/social/{}/callback", name)
    });

    Some(OAuthProviderConfig {
        name: name.to_string(),
        client_id,
        client_secret,
        redirect_uri,
        token_url: env::var(format!("{}_TOKEN_URL", prefix)).unwrap_or_else(|_| token_url.to_string()),
        userinfo_url: env::var(format!("{}_USERINFO_URL", prefix))
            .unwrap_or_else(|_| userinfo_url.to_string()),
    })
}
