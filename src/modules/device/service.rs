use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::interface::{DeviceRepository, SessionRepository};
use super::model::{recalculate_expiry, Device, Session, TRUSTED_SESSION_DAYS};
use crate::error::{AuthError, Result};
use crate::modules::auth::extractor::AuthUser;
use crate::modules::auth::interface::{
    TwoFactorSessionRepository, UserRepository, VerificationCodeRepository,
};
use crate::modules::auth::model::User;
use crate::services::cache::{invalidate, keys};
use crate::services::fingerprint::DeviceContext;
use crate::services::jwt::hash_token;
use crate::AppState;

pub const TRUSTED_CACHE_TTL: Duration = Duration::from_secs(TRUSTED_SESSION_DAYS as u64 * 24 * 60 * 60);

/// Session and token pair handed out after a successful sign-in.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub device: Device,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Records the device, opens a session sized by the device's trust and
/// signs the token pair. Also clears the user's failed-login counter.
pub async fn issue_session(state: &AppState, user: &User, ctx: &DeviceContext) -> Result<IssuedSession> {
    let now = Utc::now();
    let device = state
        .store
        .record_device_use(&user.id, &ctx.fingerprint, &ctx.name, &ctx.ip, now)
        .await?;

    let session_id = Uuid::new_v4().to_string();
    let expires_at = recalculate_expiry(now, device.trusted);
    let refresh_token = state
        .jwt_service
        .create_refresh_token(&user.id, &session_id, expires_at)?;
    let access_token = state
        .jwt_service
        .create_access_token(&user.id, &session_id, &user.email)?;

    let session = Session {
        id: session_id,
        user_id: user.id.clone(),
        device_id: device.id.clone(),
        refresh_token_hash: hash_token(&refresh_token),
        ip_address: ctx.ip.clone(),
        location: None,
        created_at: now,
        last_active_at: now,
        expires_at,
        revoke_at: None,
        revoked: false,
    };
    state.store.create_session(&session).await?;

    if user.failed_login_attempts > 0 || user.locked_until.is_some() {
        state.store.reset_login_failures(&user.id).await?;
    }

    invalidate(
        state.cache.as_ref(),
        &[
            keys::user_devices(&user.id),
            keys::user_sessions(&user.id),
            keys::user_security_overview(&user.id),
        ],
    )
    .await;

    tracing::info!(
        user_id = %user.id,
        session_id = %session.id,
        device_id = %device.id,
        trusted = device.trusted,
        "session issued"
    );

    Ok(IssuedSession {
        session,
        device,
        access_token,
        refresh_token,
        expires_in: state.jwt_service.get_access_token_duration_secs(),
    })
}

/// Flips the trust flag of one of the caller's devices and resizes the
/// live sessions on it.
pub async fn set_device_trust(
    state: &AppState,
    caller: &AuthUser,
    device_id: &str,
    trusted: bool,
) -> Result<Device> {
    let device = state
        .store
        .find_device(device_id)
        .await?
        .filter(|d| d.user_id == caller.user_id)
        .ok_or(AuthError::NotFound("Device"))?;

    if device.trusted == trusted {
        return Ok(device);
    }

    if trusted {
        let caller_trusted = state
            .store
            .find_device(&caller.device_id)
            .await?
            .is_some_and(|d| d.trusted);

        if !caller_trusted {
            // First trusted device: only the device in hand can be promoted.
            let bootstrap = device.id == caller.device_id
                && state.store.count_trusted_devices(&caller.user_id).await? == 0;
            if !bootstrap {
                return Err(AuthError::Forbidden(
                    "Only a trusted device can trust other devices",
                ));
            }
        }
    }

    state
        .store
        .set_device_trust(&caller.user_id, &device.id, trusted)
        .await?;

    let now = Utc::now();
    let mut stale = keys::user_security(&caller.user_id);

    let sessions = state.store.list_device_sessions(&device.id).await?;
    let mut resized = 0usize;
    for session in sessions.iter().filter(|s| s.is_live(now)) {
        let expires_at = recalculate_expiry(session.created_at, trusted);
        state.store.set_session_expiry(&session.id, expires_at).await?;
        stale.push(keys::session(&session.id));
        resized += 1;
    }

    let trust_key = keys::trusted_device(&caller.user_id, &device.fingerprint);
    let cached = if trusted {
        state.cache.set(&trust_key, "1", TRUSTED_CACHE_TTL).await
    } else {
        state.cache.delete(&trust_key).await
    };
    if let Err(e) = cached {
        // Retried as a plain delete below.
        tracing::warn!(key = %trust_key, error = %e, "trust cache update failed");
        stale.push(trust_key);
    }

    invalidate(state.cache.as_ref(), &stale).await;

    tracing::info!(
        user_id = %caller.user_id,
        device_id = %device.id,
        trusted,
        sessions = resized,
        "device trust changed"
    );

    Ok(Device { trusted, ..device })
}

/// Revokes one of the caller's sessions.
pub async fn revoke_session(state: &AppState, caller: &AuthUser, session_id: &str) -> Result<()> {
    let session = state
        .store
        .find_session(session_id)
        .await?
        .filter(|s| s.user_id == caller.user_id)
        .ok_or(AuthError::NotFound("Session"))?;

    state.store.revoke_session(&session.id).await?;
    invalidate(
        state.cache.as_ref(),
        &[
            keys::session(&session.id),
            keys::user_sessions(&caller.user_id),
            keys::user_security_overview(&caller.user_id),
        ],
    )
    .await;

    tracing::info!(user_id = %caller.user_id, session_id = %session.id, "session revoked");
    Ok(())
}

/// Sets or clears the time at which one of the caller's live sessions ends
/// regardless of its regular expiry. Trust changes keep this bound.
pub async fn schedule_revocation(
    state: &AppState,
    caller: &AuthUser,
    session_id: &str,
    revoke_at: Option<DateTime<Utc>>,
) -> Result<Session> {
    let now = Utc::now();
    let mut session = state
        .store
        .find_session(session_id)
        .await?
        .filter(|s| s.user_id == caller.user_id && s.is_live(now))
        .ok_or(AuthError::NotFound("Session"))?;

    if revoke_at.is_some_and(|at| at <= now) {
        return Err(AuthError::Validation("revoke_at must be in the future".into()));
    }

    state.store.set_session_revoke_at(&session.id, revoke_at).await?;
    session.revoke_at = revoke_at;
    invalidate(
        state.cache.as_ref(),
        &[keys::session(&session.id), keys::user_sessions(&caller.user_id)],
    )
    .await;

    tracing::info!(
        user_id = %caller.user_id,
        session_id = %session.id,
        revoke_at = ?revoke_at,
        "session revocation scheduled"
    );
    Ok(session)
}

/// Purges a user's expired challenges, sessions and codes. Runs at sign-in.
pub async fn sweep_expired(state: &AppState, user_id: &str) -> Result<()> {
    let now = Utc::now();
    let challenges = state.store.delete_expired_challenges(user_id, now).await?;
    let sessions = state.store.delete_expired_sessions(user_id, now).await?;
    let codes = state.store.delete_expired_codes(user_id, now).await?;

    if challenges + sessions + codes > 0 {
        tracing::debug!(user_id, challenges, sessions, codes, "expired records purged");
        invalidate(state.cache.as_ref(), &[keys::user_sessions(user_id)]).await;
    }
    Ok(())
}
