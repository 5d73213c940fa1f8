use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{future::Future, num::NonZeroU32, pin::Pin, sync::Arc, time::Duration};
use tower::{Layer, Service};

use crate::error::{AuthError, Result};
use crate::services::cache::Cache;

pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// `burst` requests at once, refilled at `burst` per minute.
pub fn create_rate_limiter(burst: u32) -> GlobalRateLimiter {
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_minute(burst).allow_burst(burst);
    Arc::new(RateLimiter::direct(quota))
}

/// Fixed-window counter kept in the cache. Concurrent bursts may slip a few
/// requests past `limit`.
pub async fn enforce_window(cache: &dyn Cache, key: &str, limit: i64, window: Duration) -> Result<()> {
    let count = cache.incr_with_ttl(key, window).await?;
    if count > limit {
        tracing::warn!(key, count, limit, "rate limit exceeded");
        return Err(AuthError::RateLimited);
    }
    Ok(())
}

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: GlobalRateLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: GlobalRateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: GlobalRateLimiter,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if limiter.check().is_err() {
                return Ok(AuthError::RateLimited.into_response());
            }
            inner.call(request).await
        })
    }
}
