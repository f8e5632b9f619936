//! Per-client throttle: at most one request per interval.
//!
//! Process-local and best effort; state resets on restart. Clients are keyed
//! by socket peer address. Forwarding headers are honoured only when the
//! service is configured to sit behind a trusted proxy.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use parking_lot::Mutex;
use tracing::warn;

use crate::{error::AppError, state::AppState};

/// Stale entries are swept once the map grows past this.
const CLEANUP_THRESHOLD: usize = 10_000;

/// Where last-request instants live. Swappable for a shared cache.
pub trait RateLimitStore: Send + Sync {
    /// In one critical section: if `key` was last allowed less than
    /// `interval` before `now`, return the remaining wait; otherwise record
    /// `now` and return `None`.
    fn hit(&self, key: &str, now: Instant, interval: Duration) -> Option<Duration>;
    fn last_seen(&self, key: &str) -> Option<Instant>;
    /// Drops entries idle for at least `max_idle`.
    fn cleanup_stale(&self, now: Instant, max_idle: Duration);
    fn reset(&self);
}

/// Thread-safe: all mutable state is behind `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    last_seen: Mutex<HashMap<String, Instant>>,
}

#[cfg(test)]
impl MemoryRateLimitStore {
    fn len(&self) -> usize {
        self.last_seen.lock().len()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(&self, key: &str, now: Instant, interval: Duration) -> Option<Duration> {
        let mut entries = self.last_seen.lock();

        if let Some(last) = entries.get(key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < interval {
                return Some(interval - elapsed);
            }
        }

        if entries.len() >= CLEANUP_THRESHOLD {
            entries.retain(|_, last| now.saturating_duration_since(*last) < interval);
        }
        entries.insert(key.to_string(), now);
        None
    }

    fn last_seen(&self, key: &str) -> Option<Instant> {
        self.last_seen.lock().get(key).copied()
    }

    fn cleanup_stale(&self, now: Instant, max_idle: Duration) {
        self.last_seen
            .lock()
            .retain(|_, last| now.saturating_duration_since(*last) < max_idle);
    }

    fn reset(&self) {
        self.last_seen.lock().clear();
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    interval: Duration,
    store: Arc<dyn RateLimitStore>,
    rejected: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self::with_store(interval, Arc::new(MemoryRateLimitStore::default()))
    }

    pub fn with_store(interval: Duration, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            interval,
            store,
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &dyn RateLimitStore {
        self.store.as_ref()
    }

    /// Total requests rejected since startup.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn check(&self, client_id: &str) -> Result<(), AppError> {
        self.check_at(client_id, Instant::now())
    }

    pub fn check_at(&self, client_id: &str, now: Instant) -> Result<(), AppError> {
        match self.store.hit(client_id, now, self.interval) {
            None => Ok(()),
            Some(remaining) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                let retry_after_secs = ceil_secs(remaining).max(1);
                warn!(
                    client_id,
                    retry_after_secs,
                    rejected_total = self.rejected_count(),
                    "rate limit exceeded"
                );
                Err(AppError::TooManyRequests { retry_after_secs })
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn header_ip<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Socket peer IP. With `trust_proxy` set, `X-Forwarded-For` and then
/// `X-Real-IP` take precedence; both are client-controlled otherwise.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) =
            header_ip(headers, "x-forwarded-for").or_else(|| header_ip(headers, "x-real-ip"))
        {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extractor that admits the request or rejects it with 429.
///
/// Place it after the auth extractor so rejected credentials never spend
/// the caller's quota.
pub struct RateLimited;

#[async_trait]
impl FromRequestParts<AppState> for RateLimited {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        let id = client_id(&parts.headers, peer, state.config.trust_proxy_headers);
        state.limiter.check(&id)?;
        Ok(RateLimited)
    }
}
