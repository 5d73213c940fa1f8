use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::services::codes::generate_nonce;
use crate::AppState;

pub const DEVICE_COOKIE: &str = "device_fp";

/// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustedProxies {
    /// Forwarding headers are ignored and the socket peer is the client.
    #[default]
    None,
    /// Only these peers are proxies.
    List(Vec<IpAddr>),
    /// Every peer is a proxy that overwrites the headers it forwards.
    Any,
}

impl TrustedProxies {
    /// Parses `TRUSTED_PROXIES`: empty, `*`, or a comma-separated IP list.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::None);
        }
        if value == "*" {
            return Ok(Self::Any);
        }
        value
            .split(',')
            .map(|ip| {
                ip.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| format!("TRUSTED_PROXIES: invalid address {}", ip.trim()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::List)
    }

    fn trusts(&self, peer: Option<IpAddr>) -> bool {
        match self {
            Self::None => false,
            Self::Any => true,
            Self::List(proxies) => peer.is_some_and(|p| proxies.contains(&p)),
        }
    }

    fn is_proxy(&self, ip: &str) -> bool {
        match self {
            Self::List(proxies) => ip.parse::<IpAddr>().is_ok_and(|ip| proxies.contains(&ip)),
            _ => false,
        }
    }
}

/// The browser/device pair a request comes from.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub fingerprint: String,
    pub name: String,
    pub ip: String,
    pub user_agent: String,
}

impl DeviceContext {
    /// A device without a valid `device_fp` cookie gets a fresh random
    /// fingerprint; nothing about it is derived from request data.
    pub fn from_parts(headers: &HeaderMap, peer: Option<IpAddr>, proxies: &TrustedProxies) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let fingerprint = CookieJar::from_headers(headers)
            .get(DEVICE_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| is_valid_fingerprint(v))
            .unwrap_or_else(generate_nonce);

        Self {
            fingerprint,
            name: device_name(&user_agent),
            ip: client_ip(headers, peer, proxies),
            user_agent,
        }
    }

    /// Long-lived cookie pinning the fingerprint.
    pub fn cookie(&self) -> Cookie<'static> {
        Cookie::build((DEVICE_COOKIE, self.fingerprint.clone()))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .permanent()
            .build()
    }
}

impl FromRequestParts<Arc<AppState>> for DeviceContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self::from_parts(&parts.headers, peer, &state.trusted_proxies))
    }
}

fn is_valid_fingerprint(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The socket peer, unless it is a trusted proxy. Behind a listed proxy the
/// rightmost forwarded hop that is not itself a proxy wins.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, proxies: &TrustedProxies) -> String {
    let peer_ip = peer.map(|p| p.to_string());
    if !proxies.trusts(peer) {
        return peer_ip.unwrap_or_else(|| "unknown".to_string());
    }

    let forwarded: Vec<&str> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(str::trim).filter(|ip| !ip.is_empty()).collect())
        .unwrap_or_default();

    let from_chain = match proxies {
        TrustedProxies::Any => forwarded.first().copied(),
        _ => forwarded.iter().rev().find(|ip| !proxies.is_proxy(ip)).copied(),
    };

    from_chain
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::to_string)
        .or(peer_ip)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Short label such as "Firefox on Linux".
pub fn device_name(user_agent: &str) -> String {
    let browser = if user_agent.contains("Edg/") {
        "Edge"
    } else if user_agent.contains("Firefox/") {
        "Firefox"
    } else if user_agent.contains("Chrome/") {
        "Chrome"
    } else if user_agent.contains("Safari/") {
        "Safari"
    } else {
        "Unknown browser"
    };

    let os = if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        "iOS"
    } else if user_agent.contains("Mac OS X") {
        "macOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        "unknown OS"
    };

    format!("{} on {}", browser, os)
}
