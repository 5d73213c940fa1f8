use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AuthError;
use crate::modules::device::interface::SessionRepository;
use crate::modules::device::model::Session;
use crate::services::cache::{get_json, keys, set_json};
use crate::AppState;

const SESSION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Caller identity resolved from a bearer access token and a live session.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub session_id: String,
    pub device_id: String,
}

fn parse_bearer_token(header_value: &str) -> Option<&str> {
    let mut segments = header_value.split_whitespace();

    match (segments.next(), segments.next(), segments.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

/// Read-through lookup of `session:{id}`.
pub async fn load_session(state: &AppState, session_id: &str) -> Result<Option<Session>, AuthError> {
    let key = keys::session(session_id);
    if let Some(session) = get_json::<Session>(state.cache.as_ref(), &key).await {
        return Ok(Some(session));
    }

    let session = state.store.find_session(session_id).await?;
    if let Some(ref s) = session {
        set_json(state.cache.as_ref(), &key, s, SESSION_CACHE_TTL).await;
    }
    Ok(session)
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_token)
            .ok_or(AuthError::Unauthorized)?;

        let claims = state
            .jwt_service
            .verify_access_token(token)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        let session = load_session(state, &claims.sid)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if session.user_id != claims.sub || !session.is_live(Utc::now()) {
            return Err(AuthError::InvalidToken);
        }

        Ok(Self {
            user_id: claims.sub,
            email: claims.email,
            session_id: session.id,
            device_id: session.device_id,
        })
    }
}
