//! Per-IP rate limiting for the Request API.
//!
//! Token-bucket per client address: sustained rate with a burst allowance.
//! Buckets are purged after a period of inactivity by a background task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;

use crate::error::ServerError;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    /// Whether a request from `ip` is admitted right now.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(ip)
            .or_insert_with(|| Bucket::full(self.capacity));
        bucket.try_take(self.rate, self.capacity)
    }

    /// Drop buckets idle for longer than `max_idle_secs`.
    pub fn purge_stale(&self, max_idle_secs: f64) {
        let now = Instant::now();
        self.buckets
            .lock()
            .retain(|_, b| now.duration_since(b.last_refill).as_secs_f64() < max_idle_secs);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        // 10 req/s sustained, burst of 30.
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip) {
            tracing::warn!(ip = %ip, "rate limit exceeded");
            return Err(ServerError::RateLimited);
        }
    }

    Ok(next.run(req).await)
}

/// Resolve the client address: ConnectInfo first, then the usual proxy
/// headers.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    for header in ["x-forwarded-for", "x-real-ip"] {
        let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let candidate = value.split(',').next().unwrap_or(value).trim();
        if let Ok(ip) = candidate.parse::<IpAddr>() {
            return Some(ip);
        }
    }

    None
}
