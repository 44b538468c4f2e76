use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use metrics::counter;
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;

const METRIC_RATE_LIMITED: &str = "rolodex_http_rate_limited_total";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter per client.
///
/// Windows that have run out are swept at most once per window length, so
/// the bucket map stays proportional to the clients seen in one window.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    trust_forwarded_for: bool,
    buckets: DashMap<String, Window>,
    last_sweep: Mutex<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            trust_forwarded_for: false,
            buckets: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Key clients on the first `X-Forwarded-For` hop instead of the peer
    /// address. Only safe behind a proxy that rewrites the header.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        self.sweep_expired(now);

        let mut entry = self.buckets.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let left = self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            return RateDecision::Limited {
                retry_after_secs: left.as_secs().max(1),
            };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    fn sweep_expired(&self, now: Instant) {
        // A busy sweeper means another request is already doing the work.
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last_sweep) < self.window {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let window = self.window;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.started) < window);
    }

    /// Peer address, or the first `X-Forwarded-For` hop when trusted. Requests
    /// without either share one bucket.
    fn client_key(&self, request: &Request<Body>) -> String {
        if self.trust_forwarded_for
            && let Some(forwarded) = forwarded_for(request)
        {
            return forwarded.to_string();
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn forwarded_for(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub async fn enforce(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let client = state.rate_limiter.client_key(&request);

    match state.rate_limiter.check(&client) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after_secs } => {
            debug!(
                target = "rolodex::http::rate_limit",
                client = %client,
                limit = state.rate_limiter.limit(),
                "rate limit exceeded"
            );
            counter!(METRIC_RATE_LIMITED).increment(1);
            ApiError::rate_limited(retry_after_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_caps_requests_then_resets() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        assert_eq!(
            limiter.check_at("a", start),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("a", start),
            RateDecision::Allowed { remaining: 0 }
        );
        assert!(matches!(
            limiter.check_at("a", start + Duration::from_secs(10)),
            RateDecision::Limited {
                retry_after_secs: 50
            }
        ));

        // other clients have their own window
        assert!(matches!(
            limiter.check_at("b", start),
            RateDecision::Allowed { .. }
        ));

        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(60)),
            RateDecision::Allowed { remaining: 1 }
        );
    }

    fn forwarded(value: &str, peer: Option<&str>) -> Request<Body> {
        let mut request = Request::builder()
            .header(FORWARDED_FOR_HEADER, value)
            .body(Body::empty())
            .expect("request");
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().expect("socket addr");
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn forwarded_header_is_ignored_unless_trusted() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let request = forwarded("10.0.0.1, 10.0.0.2", Some("192.0.2.7:5000"));
        assert_eq!(limiter.client_key(&request), "192.0.2.7");

        let bare = Request::builder().body(Body::empty()).expect("request");
        assert_eq!(limiter.client_key(&bare), "unknown");
    }

    #[test]
    fn trusted_forwarded_header_picks_first_hop() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2).trust_forwarded_for(true);
        let request = forwarded("10.0.0.1, 10.0.0.2", Some("192.0.2.7:5000"));
        assert_eq!(limiter.client_key(&request), "10.0.0.1");

        let blank = forwarded("  ", Some("192.0.2.7:5000"));
        assert_eq!(limiter.client_key(&blank), "192.0.2.7");
    }

    #[test]
    fn expired_windows_are_swept() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        for client in ["a", "b", "c"] {
            limiter.check_at(client, start);
        }
        assert_eq!(limiter.tracked_clients(), 3);

        // Within the window nothing is dropped.
        limiter.check_at("d", start + Duration::from_secs(30));
        assert_eq!(limiter.tracked_clients(), 4);

        // A later request sweeps every window that has run out.
        limiter.check_at("e", start + Duration::from_secs(120));
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
