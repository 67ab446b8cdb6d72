use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

// ── Tiers ──

/// Route groups with their own request budgets. Health checks are unlimited
/// and have no tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Catalogue reads.
    Public,
    /// Wizard interaction (selection, slots, navigation).
    Wizard,
    /// Login, registration and account reads.
    Auth,
    /// Anything that writes appointments.
    Booking,
}

impl Tier {
    pub fn limit(self) -> Limit {
        match self {
            Tier::Public | Tier::Wizard => Limit::per(60, Duration::from_secs(60)),
            Tier::Auth => Limit::per(30, Duration::from_secs(60)),
            Tier::Booking => Limit::per(10, Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max_requests: usize,
    pub window: Duration,
}

impl Limit {
    pub const fn per(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

// ── Limiter ──

/// Per-IP sliding-window request log, one per tier.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    hits: Arc<DashMap<(Tier, IpAddr), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Err(retry_after_secs)` when `ip` has used up `limit` for `tier`.
    pub fn check_with(&self, tier: Tier, limit: Limit, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut log = self.hits.entry((tier, ip)).or_default();
        log.retain(|t| now.duration_since(*t) < limit.window);

        if log.len() >= limit.max_requests {
            let retry_after = (log[0] + limit.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }
        log.push(now);
        Ok(())
    }

    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        self.check_with(tier, tier.limit(), ip)
    }

    /// Drop logs with nothing inside twice their tier's window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _), log| {
            let horizon = tier.limit().window * 2;
            log.retain(|t| now.duration_since(*t) < horizon);
            !log.is_empty()
        });
    }
}

/// Client IP: first `X-Forwarded-For` hop when behind the proxy, else the peer.
pub fn client_ip(req: &Request) -> IpAddr {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    forwarded
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Demasiadas solicitudes. Inténtalo de nuevo en {} segundos.",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

/// Middleware: `from_fn_with_state((limiter, tier), rate_limit)`.
pub async fn rate_limit(
    State((limiter, tier)): State<(RateLimiter, Tier)>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = client_ip(&req);
    limiter.check(tier, ip).map_err(|retry_after| {
        tracing::warn!("rate limited {} on {:?} tier", ip, tier);
        too_many_requests(retry_after)
    })?;
    Ok(next.run(req).await)
}
