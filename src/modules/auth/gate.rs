//! The second-factor gate between password (or social) sign-in and a
//! session.
//!
//! A user with 2FA enabled signing in from an untrusted device gets a
//! challenge instead of tokens. The challenge offers the configured method
//! as primary. Whitelisted recovery channels stay locked until the primary
//! method has failed `ESCALATION_THRESHOLD` times, and the challenge is
//! dropped after `MAX_CHALLENGE_FAILURES` failures.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::interface::{
    PasskeyRepository, RecoveryMethodRepository, TwoFactorSessionRepository, UserRepository,
};
use super::model::{CodePurpose, TwoFactorMethod, TwoFactorSession, User};
use super::verification::{issue_code, redeem_code};
use crate::error::{AuthError, Result};
use crate::modules::device::interface::DeviceRepository;
use crate::modules::device::service::{issue_session, IssuedSession, TRUSTED_CACHE_TTL};
use crate::services::cache::{get_json, invalidate, keys, set_json};
use crate::services::codes::{generate_nonce, mask_target};
use crate::services::fingerprint::DeviceContext;
use crate::services::rate_limit::enforce_window;
use crate::services::{passkey, totp};
use crate::AppState;

pub const CHALLENGE_TTL_MINUTES: i64 = 10;
pub const ESCALATION_THRESHOLD: u32 = 3;
pub const MAX_CHALLENGE_FAILURES: u32 = 10;

const CODE_SENDS_PER_WINDOW: i64 = 5;
const CODE_SEND_WINDOW: Duration = Duration::from_secs(10 * 60);

pub enum GateOutcome {
    Bypass(Box<IssuedSession>),
    Challenge(TwoFactorSession),
}

/// What the caller needs to answer a challenge with the requested method.
#[derive(Debug, PartialEq, Eq)]
pub enum CodeDispatch {
    /// Code generated by the user's authenticator app.
    Authenticator,
    /// Code sent to the masked destination.
    Sent { destination: String },
    /// Nonce to sign with a registered passkey.
    Passkey { nonce: String },
}

/// Proof submitted against a challenge.
pub struct ChallengeAnswer<'a> {
    pub method: TwoFactorMethod,
    pub code: Option<&'a str>,
    pub credential_id: Option<&'a str>,
    pub signature: Option<&'a str>,
}

pub async fn is_trusted_device(state: &AppState, user_id: &str, fingerprint: &str) -> Result<bool> {
    let key = keys::trusted_device(user_id, fingerprint);
    match state.cache.get(&key).await {
        Ok(Some(flag)) if flag == "1" => return Ok(true),
        Ok(_) => {}
        Err(e) => tracing::warn!(key = %key, error = %e, "trust cache read failed"),
    }

    let trusted = state
        .store
        .find_device_by_fingerprint(user_id, fingerprint)
        .await?
        .is_some_and(|d| d.trusted);

    if trusted {
        if let Err(e) = state.cache.set(&key, "1", TRUSTED_CACHE_TTL).await {
            tracing::warn!(key = %key, error = %e, "trust cache write failed");
        }
    }
    Ok(trusted)
}

/// Primary is the configured method. Additional lists the verified recovery
/// kinds in a fixed order, without duplicates.
pub async fn allowed_methods(
    state: &AppState,
    user: &User,
) -> Result<(Vec<TwoFactorMethod>, Vec<TwoFactorMethod>)> {
    let primary: Vec<TwoFactorMethod> = user.two_factor_method.into_iter().collect();

    let verified: Vec<TwoFactorMethod> = state
        .store
        .list_recovery_methods(&user.id)
        .await?
        .into_iter()
        .filter(|m| m.verified)
        .map(|m| m.kind)
        .collect();

    let additional = TwoFactorMethod::ADDITIONAL
        .into_iter()
        .filter(|kind| verified.contains(kind) && !primary.contains(kind))
        .collect();

    Ok((primary, additional))
}

pub fn method_permitted(challenge: &TwoFactorSession, method: TwoFactorMethod) -> bool {
    if challenge.primary_methods.contains(&method) {
        return true;
    }
    challenge.failed_attempts >= ESCALATION_THRESHOLD
        && challenge.additional_methods.contains(&method)
}

fn additional_unlocked(challenge: &TwoFactorSession) -> bool {
    challenge.failed_attempts >= ESCALATION_THRESHOLD && !challenge.additional_methods.is_empty()
}

fn remaining_ttl(challenge: &TwoFactorSession) -> Duration {
    (challenge.expires_at - Utc::now())
        .to_std()
        .unwrap_or(Duration::from_secs(1))
}

/// Issues a session right away, or opens a challenge when the user has 2FA
/// enabled and the device is not trusted.
pub async fn pass(
    state: &AppState,
    user: &User,
    ctx: &DeviceContext,
    social_token: Option<String>,
) -> Result<GateOutcome> {
    if !user.two_factor_enabled || is_trusted_device(state, &user.id, &ctx.fingerprint).await? {
        let issued = issue_session(state, user, ctx).await?;
        if let Some(token) = social_token {
            discard_social_token(state, &token).await;
        }
        return Ok(GateOutcome::Bypass(Box::new(issued)));
    }

    let (primary_methods, additional_methods) = allowed_methods(state, user).await?;
    let now = Utc::now();
    let challenge = TwoFactorSession {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        device_fingerprint: ctx.fingerprint.clone(),
        device_name: ctx.name.clone(),
        ip_address: ctx.ip.clone(),
        primary_methods,
        additional_methods,
        failed_attempts: 0,
        passkey_nonce: generate_nonce(),
        social_token,
        created_at: now,
        expires_at: now + ChronoDuration::minutes(CHALLENGE_TTL_MINUTES),
    };

    state.store.create_challenge(&challenge).await?;
    set_json(
        state.cache.as_ref(),
        &keys::challenge(&challenge.id),
        &challenge,
        remaining_ttl(&challenge),
    )
    .await;

    tracing::info!(
        user_id = %user.id,
        challenge_id = %challenge.id,
        device = %ctx.name,
        "second factor required"
    );

    Ok(GateOutcome::Challenge(challenge))
}

/// Cache first, then the store. Expired challenges are deleted on sight.
pub async fn load_challenge(state: &AppState, id: &str) -> Result<TwoFactorSession> {
    let key = keys::challenge(id);
    let challenge = match get_json::<TwoFactorSession>(state.cache.as_ref(), &key).await {
        Some(c) => Some(c),
        None => {
            let stored = state.store.find_challenge(id).await?;
            if let Some(ref c) = stored {
                if !c.is_expired(Utc::now()) {
                    set_json(state.cache.as_ref(), &key, c, remaining_ttl(c)).await;
                }
            }
            stored
        }
    };

    let challenge = challenge.ok_or(AuthError::InvalidChallenge)?;
    if challenge.is_expired(Utc::now()) {
        drop_challenge(state, &challenge.id).await?;
        return Err(AuthError::InvalidChallenge);
    }
    Ok(challenge)
}

/// Returns false when another request already removed the challenge.
async fn drop_challenge(state: &AppState, id: &str) -> Result<bool> {
    let removed = state.store.delete_challenge(id).await?;
    invalidate(state.cache.as_ref(), &[keys::challenge(id)]).await;
    Ok(removed)
}

/// Counts a wrong answer and returns the error to report.
pub async fn record_failure(state: &AppState, mut challenge: TwoFactorSession) -> AuthError {
    let failed_attempts = match state.store.record_challenge_failure(&challenge.id).await {
        Ok(n) => n,
        Err(e) => return e,
    };

    if failed_attempts >= MAX_CHALLENGE_FAILURES {
        tracing::warn!(
            user_id = %challenge.user_id,
            challenge_id = %challenge.id,
            failed_attempts,
            "challenge locked out"
        );
        if let Err(e) = drop_challenge(state, &challenge.id).await {
            return e;
        }
        return AuthError::TooManyAttempts;
    }

    challenge.failed_attempts = failed_attempts;
    set_json(
        state.cache.as_ref(),
        &keys::challenge(&challenge.id),
        &challenge,
        remaining_ttl(&challenge),
    )
    .await;

    tracing::info!(
        user_id = %challenge.user_id,
        challenge_id = %challenge.id,
        failed_attempts,
        "second factor rejected"
    );

    AuthError::InvalidTwoFactorCode {
        failed_attempts,
        additional_unlocked: additional_unlocked(&challenge),
    }
}

/// Prepares the requested method: sends a code, or hands out the passkey
/// nonce. Sends are capped per challenge.
pub async fn request_code(
    state: &AppState,
    challenge: &TwoFactorSession,
    method: TwoFactorMethod,
) -> Result<CodeDispatch> {
    if !method_permitted(challenge, method) {
        return Err(AuthError::MethodNotAllowed);
    }
    let user = challenge_user(state, challenge).await?;

    match method {
        TwoFactorMethod::Totp => Ok(CodeDispatch::Authenticator),
        TwoFactorMethod::Passkey => Ok(CodeDispatch::Passkey {
            nonce: challenge.passkey_nonce.clone(),
        }),
        _ => {
            enforce_window(
                state.cache.as_ref(),
                &keys::code_send_rate(&challenge.id),
                CODE_SENDS_PER_WINDOW,
                CODE_SEND_WINDOW,
            )
            .await?;

            let target = code_target(state, &user, method).await?;

            issue_code(
                state,
                &user.id,
                Some(&challenge.id),
                CodePurpose::Login,
                method,
                &target,
            )
            .await?;

            Ok(CodeDispatch::Sent {
                destination: mask_target(&target),
            })
        }
    }
}

/// The challenged user, as long as 2FA is still on for them. Challenges
/// outliving a disable are dropped.
async fn challenge_user(state: &AppState, challenge: &TwoFactorSession) -> Result<User> {
    let user = state
        .store
        .find_user(&challenge.user_id)
        .await?
        .filter(|u| u.two_factor_enabled);

    match user {
        Some(user) => Ok(user),
        None => {
            drop_challenge(state, &challenge.id).await?;
            Err(AuthError::InvalidChallenge)
        }
    }
}

async fn code_target(state: &AppState, user: &User, method: TwoFactorMethod) -> Result<String> {
    match method {
        TwoFactorMethod::Email => Ok(user.email.clone()),
        TwoFactorMethod::Sms => user.phone.clone().ok_or(AuthError::MethodNotAllowed),
        TwoFactorMethod::RecoveryEmail | TwoFactorMethod::RecoveryPhone => state
            .store
            .list_recovery_methods(&user.id)
            .await?
            .into_iter()
            .find(|m| m.verified && m.kind == method)
            .map(|m| m.target)
            .ok_or(AuthError::MethodNotAllowed),
        TwoFactorMethod::Totp | TwoFactorMethod::Passkey => Err(AuthError::MethodNotAllowed),
    }
}

/// Checks an answer. Wrong answers are counted; a correct one ends the
/// challenge and issues the session.
pub async fn verify(
    state: &AppState,
    challenge: TwoFactorSession,
    answer: ChallengeAnswer<'_>,
) -> Result<IssuedSession> {
    if !method_permitted(&challenge, answer.method) {
        return Err(AuthError::MethodNotAllowed);
    }

    let user = challenge_user(state, &challenge).await?;

    if !check_answer(state, &user, &challenge, &answer).await? {
        return Err(record_failure(state, challenge).await);
    }

    complete(state, &user, challenge).await
}

async fn check_answer(
    state: &AppState,
    user: &User,
    challenge: &TwoFactorSession,
    answer: &ChallengeAnswer<'_>,
) -> Result<bool> {
    match answer.method {
        TwoFactorMethod::Totp => {
            let (Some(secret), Some(code)) = (user.two_factor_secret.as_deref(), answer.code) else {
                return Ok(false);
            };
            match totp::matching_step(secret, &user.email, code)? {
                Some(step) => state.store.claim_totp_step(&user.id, step).await,
                None => Ok(false),
            }
        }
        TwoFactorMethod::Passkey => {
            let (Some(credential_id), Some(signature)) = (answer.credential_id, answer.signature)
            else {
                return Ok(false);
            };
            let Some(credential) = state.store.find_passkey(&user.id, credential_id).await? else {
                return Ok(false);
            };
            if !passkey::verify_assertion(&credential.public_key, &challenge.passkey_nonce, signature) {
                return Ok(false);
            }
            state.store.bump_passkey_counter(&credential.id).await?;
            Ok(true)
        }
        method => {
            let Some(code) = answer.code else {
                return Ok(false);
            };
            redeem_code(
                state,
                &user.id,
                Some(&challenge.id),
                CodePurpose::Login,
                method,
                code,
            )
            .await
        }
    }
}

async fn complete(state: &AppState, user: &User, challenge: TwoFactorSession) -> Result<IssuedSession> {
    // Only the request that removes the challenge gets the session.
    if !drop_challenge(state, &challenge.id).await? {
        return Err(AuthError::InvalidChallenge);
    }

    let ctx = DeviceContext {
        fingerprint: challenge.device_fingerprint,
        name: challenge.device_name,
        ip: challenge.ip_address,
        user_agent: String::new(),
    };
    let issued = issue_session(state, user, &ctx).await?;

    if let Some(token) = challenge.social_token {
        discard_social_token(state, &token).await;
    }

    tracing::info!(
        user_id = %user.id,
        challenge_id = %challenge.id,
        "second factor accepted"
    );
    Ok(issued)
}

async fn discard_social_token(state: &AppState, token: &str) {
    invalidate(state.cache.as_ref(), &[keys::social_token(token)]).await;
}
