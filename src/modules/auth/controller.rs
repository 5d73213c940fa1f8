use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use super::extractor::AuthUser;
use super::gate::{self, ChallengeAnswer, CodeDispatch, GateOutcome};
use super::interface::{PasskeyRepository, RecoveryMethodRepository, UserRepository};
use super::model::{CodePurpose, PasskeyCredential, RecoveryMethod, TwoFactorMethod, User};
use super::schema::{
    AddRecoveryMethodRequest, ChallengeResponse, Confirm2faRequest, Disable2faRequest,
    Enable2faRequest, Enable2faResponse, LoginRequest, LoginResponse, MessageResponse,
    MethodsResponse, PasskeyResponse, PendingSocialLogin, PendingTwoFactorSetup,
    RecoveryMethodResponse, RefreshTokenRequest, RegisterPasskeyRequest, RegisterRequest,
    RegisterResponse, SecurityOverviewResponse, SocialCallbackQuery, SocialCallbackResponse,
    SocialCompleteRequest, TokenResponse, TwoFactorCodeRequest, TwoFactorCodeResponse,
    TwoFactorVerifyRequest, UserResponse, VerifyRecoveryMethodRequest, PHONE_REGEX,
};
use super::verification::{issue_code, redeem_code};
use crate::error::{AuthError, Result};
use crate::modules::device::interface::{DeviceRepository, SessionRepository};
use crate::modules::device::service::{revoke_session, sweep_expired, IssuedSession};
use crate::services::cache::{get_json, invalidate, keys, set_json};
use crate::services::codes::{generate_nonce, mask_target};
use crate::services::fingerprint::DeviceContext;
use crate::services::jwt::hash_token;
use crate::services::rate_limit::enforce_window;
use crate::services::{hashing, passkey, totp};
use crate::AppState;

const LOGIN_ATTEMPTS_PER_WINDOW: i64 = 10;
const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);
const MAX_FAILED_LOGINS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SOCIAL_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);
const SETUP_TTL: Duration = Duration::from_secs(10 * 60);
const VIEW_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

// =============================================================================
// REGISTER / LOGIN
// =============================================================================

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    req.validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    if req.password != req.password_confirm {
        return Err(AuthError::Validation("Passwords do not match".into()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: req.email.trim().to_lowercase(),
        phone: req.phone,
        password_hash: hashing::hash_password(&req.password)?,
        email_verified: false,
        phone_verified: false,
        two_factor_enabled: false,
        two_factor_method: None,
        two_factor_secret: None,
        totp_last_step: None,
        failed_login_attempts: 0,
        locked_until: None,
        created_at: now,
        updated_at: now,
    };

    state.store.create_user(&user).await?;
    tracing::info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(&user),
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ctx: DeviceContext,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>)> {
    enforce_window(
        state.cache.as_ref(),
        &keys::login_rate(&ctx.ip),
        LOGIN_ATTEMPTS_PER_WINDOW,
        LOGIN_WINDOW,
    )
    .await?;

    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let now = Utc::now();
    if user.is_locked(now) {
        return Err(AuthError::AccountLocked);
    }

    if !hashing::verify_password(&req.password, &user.password_hash)? {
        record_failed_login(&state, &user).await?;
        return Err(AuthError::InvalidCredentials);
    }

    sweep_expired(&state, &user.id).await?;
    let outcome = gate::pass(&state, &user, &ctx, None).await?;

    Ok((jar.add(ctx.cookie()), Json(login_response(outcome))))
}

async fn record_failed_login(state: &AppState, user: &User) -> Result<()> {
    let until = Utc::now() + ChronoDuration::minutes(LOCKOUT_MINUTES);
    let attempts = state
        .store
        .record_login_failure(&user.id, MAX_FAILED_LOGINS, until)
        .await?;
    if attempts >= MAX_FAILED_LOGINS {
        tracing::warn!(user_id = %user.id, locked_until = %until, "account locked");
    } else {
        tracing::info!(user_id = %user.id, attempts, "failed login");
    }
    Ok(())
}

fn token_response(issued: &IssuedSession) -> TokenResponse {
    TokenResponse {
        access_token: issued.access_token.clone(),
        refresh_token: issued.refresh_token.clone(),
        token_type: "Bearer",
        expires_in: issued.expires_in,
    }
}

fn login_response(outcome: GateOutcome) -> LoginResponse {
    match outcome {
        GateOutcome::Bypass(issued) => LoginResponse::Tokens(token_response(&issued)),
        GateOutcome::Challenge(challenge) => LoginResponse::Challenge(ChallengeResponse {
            requires_2fa: true,
            redirect: format!("/verify-2fa?session={}", challenge.id),
            session_id: challenge.id,
            methods: MethodsResponse {
                primary: challenge.primary_methods,
                additional: challenge.additional_methods,
            },
        }),
    }
}

// =============================================================================
// SOCIAL LOGIN
// =============================================================================

pub async fn social_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<SocialCallbackQuery>,
) -> Result<Json<SocialCallbackResponse>> {
    let profile = state.social.exchange_code(&provider, &query.code).await?;

    let user = match state.store.find_user_by_email(&profile.email).await? {
        Some(user) => user,
        None => create_social_user(&state, &profile.email).await?,
    };

    let token = generate_nonce();
    let pending = PendingSocialLogin {
        user_id: user.id.clone(),
        provider: profile.provider,
    };
    state
        .cache
        .set(
            &keys::social_token(&token),
            &serde_json::to_string(&pending)?,
            SOCIAL_TOKEN_TTL,
        )
        .await?;

    tracing::info!(user_id = %user.id, provider = %pending.provider, "social sign-in accepted");

    Ok(Json(SocialCallbackResponse {
        redirect: format!("/social/complete?token={}", token),
        token,
    }))
}

async fn create_social_user(state: &AppState, email: &str) -> Result<User> {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        phone: None,
        // Unusable password until the user sets one.
        password_hash: hashing::hash_password(&generate_nonce())?,
        email_verified: true,
        phone_verified: false,
        two_factor_enabled: false,
        two_factor_method: None,
        two_factor_secret: None,
        totp_last_step: None,
        failed_login_attempts: 0,
        locked_until: None,
        created_at: now,
        updated_at: now,
    };

    match state.store.create_user(&user).await {
        Ok(()) => Ok(user),
        // Lost a race with a concurrent callback for the same email.
        Err(AuthError::EmailAlreadyExists) => state
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound),
        Err(e) => Err(e),
    }
}

pub async fn social_complete(
    State(state): State<Arc<AppState>>,
    ctx: DeviceContext,
    jar: CookieJar,
    Json(req): Json<SocialCompleteRequest>,
) -> Result<(CookieJar, Json<LoginResponse>)> {
    let pending = get_json::<PendingSocialLogin>(state.cache.as_ref(), &keys::social_token(&req.token))
        .await
        .ok_or(AuthError::InvalidChallenge)?;

    let user = state
        .store
        .find_user(&pending.user_id)
        .await?
        .ok_or(AuthError::InvalidChallenge)?;

    if user.is_locked(Utc::now()) {
        return Err(AuthError::AccountLocked);
    }

    sweep_expired(&state, &user.id).await?;
    let outcome = gate::pass(&state, &user, &ctx, Some(req.token)).await?;

    Ok((jar.add(ctx.cookie()), Json(login_response(outcome))))
}

// =============================================================================
// TWO-FACTOR CHALLENGE
// =============================================================================

pub async fn request_two_factor_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TwoFactorCodeRequest>,
) -> Result<Json<TwoFactorCodeResponse>> {
    let challenge = gate::load_challenge(&state, &req.session_id).await?;
    let dispatch = gate::request_code(&state, &challenge, req.method).await?;

    let (destination, nonce) = match dispatch {
        CodeDispatch::Authenticator => (None, None),
        CodeDispatch::Sent { destination } => (Some(destination), None),
        CodeDispatch::Passkey { nonce } => (None, Some(nonce)),
    };

    Ok(Json(TwoFactorCodeResponse {
        method: req.method,
        destination,
        nonce,
    }))
}

pub async fn verify_two_factor(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TwoFactorVerifyRequest>,
) -> Result<Json<TokenResponse>> {
    let challenge = gate::load_challenge(&state, &req.session_id).await?;
    let issued = gate::verify(
        &state,
        challenge,
        ChallengeAnswer {
            method: req.method,
            code: req.code.as_deref(),
            credential_id: req.credential_id.as_deref(),
            signature: req.signature.as_deref(),
        },
    )
    .await?;

    Ok(Json(token_response(&issued)))
}

// =============================================================================
// REFRESH / LOGOUT / ME
// =============================================================================

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<TokenResponse>> {
    let claims = state
        .jwt_service
        .verify_refresh_token(&req.refresh_token)
        .map_err(|_| AuthError::InvalidToken)?
        .claims;

    let now = Utc::now();
    let session = state
        .store
        .find_session(&claims.sid)
        .await?
        .filter(|s| s.user_id == claims.sub && s.is_live(now))
        .ok_or(AuthError::InvalidToken)?;

    if session.refresh_token_hash != hash_token(&req.refresh_token) {
        // A rotated token came back: treat the session as stolen.
        state.store.revoke_session(&session.id).await?;
        invalidate(state.cache.as_ref(), &[keys::session(&session.id)]).await;
        tracing::warn!(user_id = %session.user_id, session_id = %session.id, "refresh token reuse");
        return Err(AuthError::InvalidToken);
    }

    let user = state
        .store
        .find_user(&claims.sub)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    let refresh_token = state
        .jwt_service
        .create_refresh_token(&user.id, &session.id, session.effective_expiry())?;
    let access_token = state
        .jwt_service
        .create_access_token(&user.id, &session.id, &user.email)?;

    state
        .store
        .rotate_refresh_token(&session.id, &hash_token(&refresh_token), now)
        .await?;
    invalidate(state.cache.as_ref(), &[keys::session(&session.id)]).await;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: state.jwt_service.get_access_token_duration_secs(),
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<MessageResponse>> {
    revoke_session(&state, &auth, &auth.session_id).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully",
    }))
}

pub async fn me(State(state): State<Arc<AppState>>, auth: AuthUser) -> Result<Json<UserResponse>> {
    let key = keys::user_profile(&auth.user_id);
    if let Some(profile) = get_json::<UserResponse>(state.cache.as_ref(), &key).await {
        return Ok(Json(profile));
    }

    let user = state
        .store
        .find_user(&auth.user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    let profile = UserResponse::from(&user);
    set_json(state.cache.as_ref(), &key, &profile, VIEW_CACHE_TTL).await;

    Ok(Json(profile))
}

pub async fn security_overview(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SecurityOverviewResponse>> {
    let key = keys::user_security_overview(&auth.user_id);
    if let Some(overview) = get_json::<SecurityOverviewResponse>(state.cache.as_ref(), &key).await {
        return Ok(Json(overview));
    }

    let user = state
        .store
        .find_user(&auth.user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    let trusted_devices = state.store.count_trusted_devices(&user.id).await?;
    let active_sessions = state
        .store
        .list_live_sessions(&user.id, Utc::now())
        .await?
        .len();
    let recovery_methods = state
        .store
        .list_recovery_methods(&user.id)
        .await?
        .into_iter()
        .filter(|m| m.verified)
        .map(|m| m.kind)
        .collect();

    let overview = SecurityOverviewResponse {
        two_factor_enabled: user.two_factor_enabled,
        two_factor_method: user.two_factor_method,
        trusted_devices,
        active_sessions,
        recovery_methods,
    };
    set_json(state.cache.as_ref(), &key, &overview, VIEW_CACHE_TTL).await;

    Ok(Json(overview))
}

// =============================================================================
// TWO-FACTOR MANAGEMENT
// =============================================================================

async fn current_user(state: &AppState, auth: &AuthUser) -> Result<User> {
    state
        .store
        .find_user(&auth.user_id)
        .await?
        .ok_or(AuthError::UserNotFound)
}

pub async fn enable_two_factor(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<Enable2faRequest>,
) -> Result<Json<Enable2faResponse>> {
    let user = current_user(&state, &auth).await?;
    if user.two_factor_enabled {
        return Err(AuthError::TwoFactorAlreadyEnabled);
    }

    let mut response = Enable2faResponse {
        method: req.method,
        secret: None,
        otpauth_url: None,
        destination: None,
    };

    let pending = match req.method {
        TwoFactorMethod::Totp => {
            let secret = totp::generate_secret();
            response.otpauth_url = Some(totp::otpauth_url(&secret, &user.email)?);
            response.secret = Some(secret.clone());
            PendingTwoFactorSetup {
                method: TwoFactorMethod::Totp,
                secret: Some(secret),
            }
        }
        TwoFactorMethod::Email | TwoFactorMethod::Sms => {
            let target = match req.method {
                TwoFactorMethod::Email => user.email.clone(),
                _ => user
                    .phone
                    .clone()
                    .ok_or_else(|| AuthError::Validation("No phone number on file".into()))?,
            };
            issue_code(
                &state,
                &user.id,
                None,
                CodePurpose::EnableTwoFactor,
                req.method,
                &target,
            )
            .await?;
            response.destination = Some(mask_target(&target));
            PendingTwoFactorSetup {
                method: req.method,
                secret: None,
            }
        }
        _ => {
            return Err(AuthError::Validation(
                "Recovery channels cannot be the primary method".into(),
            ))
        }
    };

    state
        .cache
        .set(
            &keys::two_factor_setup(&user.id),
            &serde_json::to_string(&pending)?,
            SETUP_TTL,
        )
        .await?;

    Ok(Json(response))
}

pub async fn confirm_two_factor(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<Confirm2faRequest>,
) -> Result<Json<MessageResponse>> {
    let user = current_user(&state, &auth).await?;
    if user.two_factor_enabled {
        return Err(AuthError::TwoFactorAlreadyEnabled);
    }

    let setup_key = keys::two_factor_setup(&user.id);
    let pending = get_json::<PendingTwoFactorSetup>(state.cache.as_ref(), &setup_key)
        .await
        .ok_or_else(|| AuthError::Validation("No pending two-factor setup".into()))?;

    let valid = match (pending.method, pending.secret.as_deref()) {
        (TwoFactorMethod::Totp, Some(secret)) => totp::verify(secret, &user.email, &req.code)?,
        (method, _) => {
            redeem_code(
                &state,
                &user.id,
                None,
                CodePurpose::EnableTwoFactor,
                method,
                &req.code,
            )
            .await?
        }
    };
    if !valid {
        return Err(AuthError::InvalidCode);
    }

    state
        .store
        .enable_two_factor(&user.id, pending.method, pending.secret.as_deref())
        .await?;

    let mut stale = keys::user_security(&user.id);
    stale.push(setup_key);
    invalidate(state.cache.as_ref(), &stale).await;

    tracing::info!(user_id = %user.id, method = pending.method.as_str(), "2FA enabled");
    Ok(Json(MessageResponse {
        message: "2FA enabled successfully",
    }))
}

pub async fn disable_two_factor(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<Disable2faRequest>,
) -> Result<Json<MessageResponse>> {
    let user = current_user(&state, &auth).await?;
    if !user.two_factor_enabled {
        return Err(AuthError::TwoFactorNotEnabled);
    }

    if !hashing::verify_password(&req.password, &user.password_hash)? {
        return Err(AuthError::InvalidCredentials);
    }

    state.store.disable_two_factor(&user.id).await?;
    invalidate(state.cache.as_ref(), &keys::user_security(&user.id)).await;

    tracing::info!(user_id = %user.id, "2FA disabled");
    Ok(Json(MessageResponse {
        message: "2FA disabled successfully",
    }))
}

// =============================================================================
// RECOVERY METHODS
// =============================================================================

pub async fn list_recovery_methods(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<RecoveryMethodResponse>>> {
    let key = keys::user_recovery_methods(&auth.user_id);
    if let Some(methods) = get_json::<Vec<RecoveryMethodResponse>>(state.cache.as_ref(), &key).await {
        return Ok(Json(methods));
    }

    let methods: Vec<RecoveryMethodResponse> = state
        .store
        .list_recovery_methods(&auth.user_id)
        .await?
        .iter()
        .map(RecoveryMethodResponse::from)
        .collect();
    set_json(state.cache.as_ref(), &key, &methods, VIEW_CACHE_TTL).await;

    Ok(Json(methods))
}

pub async fn add_recovery_method(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<AddRecoveryMethodRequest>,
) -> Result<(StatusCode, Json<RecoveryMethodResponse>)> {
    let target = req.target.trim().to_string();
    match req.kind {
        TwoFactorMethod::RecoveryEmail if target.validate_email() => {}
        TwoFactorMethod::RecoveryPhone if PHONE_REGEX.is_match(&target) => {}
        TwoFactorMethod::RecoveryEmail | TwoFactorMethod::RecoveryPhone => {
            return Err(AuthError::Validation("Invalid recovery target".into()));
        }
        _ => {
            return Err(AuthError::Validation(
                "Only recovery email and phone can be added here".into(),
            ));
        }
    }

    let method = RecoveryMethod {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user_id.clone(),
        kind: req.kind,
        target,
        verified: false,
        created_at: Utc::now(),
    };
    state.store.create_recovery_method(&method).await?;

    issue_code(
        &state,
        &auth.user_id,
        Some(&method.id),
        CodePurpose::RecoveryMethod,
        method.kind,
        &method.target,
    )
    .await?;
    invalidate(
        state.cache.as_ref(),
        &[keys::user_recovery_methods(&auth.user_id)],
    )
    .await;

    Ok((StatusCode::CREATED, Json(RecoveryMethodResponse::from(&method))))
}

async fn owned_recovery_method(state: &AppState, auth: &AuthUser, id: &str) -> Result<RecoveryMethod> {
    state
        .store
        .find_recovery_method(id)
        .await?
        .filter(|m| m.user_id == auth.user_id)
        .ok_or(AuthError::NotFound("Recovery method"))
}

pub async fn verify_recovery_method(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<VerifyRecoveryMethodRequest>,
) -> Result<Json<RecoveryMethodResponse>> {
    let mut method = owned_recovery_method(&state, &auth, &id).await?;
    if method.verified {
        return Ok(Json(RecoveryMethodResponse::from(&method)));
    }

    let valid = redeem_code(
        &state,
        &auth.user_id,
        Some(&method.id),
        CodePurpose::RecoveryMethod,
        method.kind,
        &req.code,
    )
    .await?;
    if !valid {
        return Err(AuthError::InvalidCode);
    }

    state.store.mark_recovery_method_verified(&method.id).await?;
    method.verified = true;
    invalidate(state.cache.as_ref(), &keys::user_security(&auth.user_id)).await;

    tracing::info!(user_id = %auth.user_id, kind = method.kind.as_str(), "recovery method verified");
    Ok(Json(RecoveryMethodResponse::from(&method)))
}

pub async fn delete_recovery_method(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let method = owned_recovery_method(&state, &auth, &id).await?;
    state.store.delete_recovery_method(&method.id).await?;
    invalidate(state.cache.as_ref(), &keys::user_security(&auth.user_id)).await;

    tracing::info!(user_id = %auth.user_id, kind = method.kind.as_str(), "recovery method removed");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PASSKEYS
// =============================================================================

pub async fn register_passkey(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<RegisterPasskeyRequest>,
) -> Result<(StatusCode, Json<PasskeyResponse>)> {
    req.validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;
    let public_key = passkey::parse_public_key(&req.public_key)?;

    let now = Utc::now();
    let credential = PasskeyCredential {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user_id.clone(),
        credential_id: req.credential_id,
        public_key,
        name: req.name,
        sign_count: 0,
        created_at: now,
    };
    state.store.create_passkey(&credential).await?;

    let whitelisted = state
        .store
        .list_recovery_methods(&auth.user_id)
        .await?
        .iter()
        .any(|m| m.kind == TwoFactorMethod::Passkey && m.verified);
    if !whitelisted {
        state
            .store
            .create_recovery_method(&RecoveryMethod {
                id: Uuid::new_v4().to_string(),
                user_id: auth.user_id.clone(),
                kind: TwoFactorMethod::Passkey,
                target: credential.name.clone(),
                verified: true,
                created_at: now,
            })
            .await?;
    }
    invalidate(state.cache.as_ref(), &keys::user_security(&auth.user_id)).await;

    tracing::info!(user_id = %auth.user_id, credential_id = %credential.credential_id, "passkey registered");
    Ok((StatusCode::CREATED, Json(PasskeyResponse::from(&credential))))
}
