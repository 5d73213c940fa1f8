use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{Device, Session};

#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub id: String,
    pub name: String,
    pub trusted: bool,
    pub login_count: u32,
    pub last_ip: String,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
}

impl DeviceResponse {
    pub fn new(device: &Device, current_device_id: &str) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            trusted: device.trusted,
            login_count: device.login_count,
            last_ip: device.last_ip.clone(),
            last_used_at: device.last_used_at,
            created_at: device.created_at,
            is_current: device.id == current_device_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrustDeviceRequest {
    pub trusted: bool,
}

/// `null` cancels a scheduled revocation.
#[derive(Debug, Deserialize)]
pub struct ScheduleRevocationRequest {
    pub revoke_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub device_id: String,
    pub ip_address: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoke_at: Option<DateTime<Utc>>,
    pub is_current: bool,
}

impl SessionResponse {
    pub fn new(session: &Session, current_session_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            device_id: session.device_id.clone(),
            ip_address: session.ip_address.clone(),
            location: session.location.clone(),
            created_at: session.created_at,
            last_active_at: session.last_active_at,
            expires_at: session.effective_expiry(),
            revoke_at: session.revoke_at,
            is_current: session.id == current_session_id,
        }
    }
}
