use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::interface::{DeviceRepository, SessionRepository};
use super::model::{Device, Session};
use super::schema::{
    DeviceResponse, ScheduleRevocationRequest, SessionResponse, TrustDeviceRequest,
};
use super::service;
use crate::error::Result;
use crate::modules::auth::extractor::AuthUser;
use crate::services::cache::{get_json, keys, set_json};
use crate::AppState;

const DEVICES_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const SESSIONS_CACHE_TTL: Duration = Duration::from_secs(60);

pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<DeviceResponse>>> {
    let key = keys::user_devices(&auth.user_id);
    let devices = match get_json::<Vec<Device>>(state.cache.as_ref(), &key).await {
        Some(devices) => devices,
        None => {
            let devices = state.store.list_devices(&auth.user_id).await?;
            set_json(state.cache.as_ref(), &key, &devices, DEVICES_CACHE_TTL).await;
            devices
        }
    };

    Ok(Json(
        devices
            .iter()
            .map(|d| DeviceResponse::new(d, &auth.device_id))
            .collect(),
    ))
}

pub async fn set_trust(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<TrustDeviceRequest>,
) -> Result<Json<DeviceResponse>> {
    let device = service::set_device_trust(&state, &auth, &id, req.trusted).await?;
    Ok(Json(DeviceResponse::new(&device, &auth.device_id)))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<SessionResponse>>> {
    let key = keys::user_sessions(&auth.user_id);
    let now = Utc::now();
    let sessions = match get_json::<Vec<Session>>(state.cache.as_ref(), &key).await {
        Some(sessions) => sessions,
        None => {
            let sessions = state.store.list_live_sessions(&auth.user_id, now).await?;
            set_json(state.cache.as_ref(), &key, &sessions, SESSIONS_CACHE_TTL).await;
            sessions
        }
    };

    Ok(Json(
        sessions
            .iter()
            .filter(|s| s.is_live(now))
            .map(|s| SessionResponse::new(s, &auth.session_id))
            .collect(),
    ))
}

pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    service::revoke_session(&state, &auth, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn schedule_revocation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<ScheduleRevocationRequest>,
) -> Result<Json<SessionResponse>> {
    let session = service::schedule_revocation(&state, &auth, &id, req.revoke_at).await?;
    Ok(Json(SessionResponse::new(&session, &auth.session_id)))
}
