use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::environment::OAuthProviderConfig;
use crate::error::{AuthError, Result};

/// Identity returned by a social provider after the code exchange.
#[derive(Debug, Clone)]
pub struct SocialProfile {
    pub provider: String,
    pub email: String,
}

#[async_trait]
pub trait SocialProvider: Send + Sync {
    async fn exchange_code(&self, provider: &str, code: &str) -> Result<SocialProfile>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default, alias = "verified_email")]
    email_verified: Option<bool>,
}

/// Authorization-code exchange against the configured OAuth providers.
pub struct OAuthClient {
    http: reqwest::Client,
    providers: HashMap<String, OAuthProviderConfig>,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, providers: Vec<OAuthProviderConfig>) -> Self {
        Self {
            http,
            providers: providers.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl SocialProvider for OAuthClient {
    async fn exchange_code(&self, provider: &str, code: &str) -> Result<SocialProfile> {
        let config = self
            .providers
            .get(provider)
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;

        let token: TokenResponse = self
            .http
            .post(&config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(10))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        let info: UserInfo = self
            .http
            .get(&config.userinfo_url)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::USER_AGENT, "account-guard")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        if info.email_verified == Some(false) {
            return Err(AuthError::Forbidden("Provider email is not verified"));
        }

        let email = info
            .email
            .ok_or_else(|| AuthError::Upstream("provider returned no email".into()))?;

        Ok(SocialProfile {
            provider: provider.to_string(),
            email: email.to_lowercase(),
        })
    }
}
