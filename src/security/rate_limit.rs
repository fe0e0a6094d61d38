//! Per-client fixed-window rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

/// Expired windows are purged once the map grows past this many clients,
/// at most once per window.
const PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts requests per client IP in fixed windows.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<IpAddr, Window>,
    settings: RateLimitSettings,
    last_purge: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            windows: DashMap::new(),
            settings,
            last_purge: Mutex::new(None),
        }
    }

    /// Count one request. `Err` carries the time left in the current window.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        self.purge_expired(now);

        let mut entry = self.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.settings.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.settings.max_requests {
            return Err(self.settings.window.saturating_sub(now.duration_since(entry.started)));
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop expired windows. Returns whether a sweep ran.
    fn purge_expired(&self, now: Instant) -> bool {
        if self.windows.len() <= PURGE_THRESHOLD {
            return false;
        }
        {
            let mut last = self
                .last_purge
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(previous) = *last {
                if now.saturating_duration_since(previous) < self.settings.window {
                    return false;
                }
            }
            *last = Some(now);
        }

        let window = self.settings.window;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Middleware rejecting clients over their budget with 429.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limiter.check(addr.ip()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let mut response = Response::new(Body::from("Rate limit exceeded"));
            *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after.as_secs().max(1)),
            );
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitSettings {
            window: Duration::from_millis(window_ms),
            max_requests: max,
        })
    }

    #[test]
    fn allows_up_to_budget() {
        let limiter = limiter(2, 60_000);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let now = Instant::now();
        assert!(limiter.check_at(ip, now).is_ok());
        assert!(limiter.check_at(ip, now).is_ok());
        assert!(limiter.check_at(ip, now).is_err());

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check_at(other, now).is_ok());
    }

    #[test]
    fn window_resets() {
        let limiter = limiter(1, 100);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();
        assert!(limiter.check_at(ip, start).is_ok());
        assert!(limiter.check_at(ip, start + Duration::from_millis(50)).is_err());
        assert!(limiter.check_at(ip, start + Duration::from_millis(150)).is_ok());
    }

    fn fill(limiter: &RateLimiter, clients: u32, at: Instant) {
        for n in 0..clients {
            let ip = IpAddr::from(std::net::Ipv4Addr::from(0x0a00_0000 + n));
            assert!(limiter.check_at(ip, at).is_ok());
        }
    }

    #[test]
    fn full_map_is_swept_once_per_window() {
        let limiter = limiter(5, 60_000);
        let start = Instant::now();
        // Crossing the threshold sweeps once; everyone is inside their
        // window, so nothing is removed.
        fill(&limiter, PURGE_THRESHOLD as u32 + 100, start);
        assert_eq!(limiter.tracked_clients(), PURGE_THRESHOLD + 100);

        // Requests later in the same window do not sweep again.
        let later = start + Duration::from_secs(1);
        let ip: IpAddr = "192.168.0.1".parse().unwrap();
        assert!(limiter.check_at(ip, later).is_ok());
        assert!(!limiter.purge_expired(later));
        assert!(!limiter.purge_expired(start + Duration::from_secs(59)));

        // A full window after the last sweep, it runs again.
        assert!(limiter.purge_expired(start + Duration::from_secs(60)));
    }

    #[test]
    fn expired_windows_are_dropped_after_a_window() {
        let limiter = limiter(5, 1_000);
        let start = Instant::now();
        fill(&limiter, PURGE_THRESHOLD as u32 + 100, start);

        let expired = start + Duration::from_secs(2);
        assert!(limiter.purge_expired(expired));
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
