mod alert_layer;
mod auth;
mod backend;
mod booking;
mod clock;
mod config;
mod error;
mod handlers;
mod models;
mod rate_limit;
mod routes;
mod session;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use auth::Authenticator;
use backend::{rest::RestBackend, Backend};
use booking::catalog::Catalog;
use booking::vouchers::{VoucherBook, VOUCHER_CACHE_TTL};
use clock::BusinessClock;
use config::Config;
use rate_limit::RateLimiter;
use session::{SessionRegistry, WizardDeps};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub clock: BusinessClock,
    pub catalog: Arc<Catalog>,
    pub vouchers: VoucherBook,
    pub sessions: SessionRegistry,
    pub auth: Authenticator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn Backend>,
        clock: BusinessClock,
        auth: Authenticator,
        session_ttl: Duration,
    ) -> Self {
        Self {
            catalog: Arc::new(Catalog::new(backend.clone(), CATALOG_CACHE_TTL)),
            vouchers: VoucherBook::new(backend.clone(), VOUCHER_CACHE_TTL),
            sessions: SessionRegistry::new(session_ttl),
            backend,
            clock,
            auth,
            started_at: Instant::now(),
        }
    }

    pub fn wizard_deps(&self) -> WizardDeps {
        WizardDeps {
            backend: self.backend.clone(),
            catalog: self.catalog.clone(),
            clock: self.clock,
        }
    }
}

/// How long the service catalogue is served from memory.
const CATALOG_CACHE_TTL: Duration = Duration::from_secs(60);
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
/// Idle session / revoked token sweep interval (seconds).
const SESSION_SWEEP_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // ── Tracing: console + optional webhook alerts ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(webhook) = config.alert_webhook_url.clone() {
        registry.with(alert_layer::AlertLayer::new(webhook)).init();
    } else {
        registry.init();
    }

    // ── Backend ──
    let backend: Arc<dyn Backend> = Arc::new(RestBackend::new(
        &config.backend_url,
        config.backend_api_key.clone(),
    )?);
    if let Err(e) = backend.health_check().await {
        tracing::warn!("backend not reachable at startup: {:#}", e);
    }

    let auth = Authenticator::new(config.session_secret.as_bytes(), config.token_ttl_secs)?;
    let state = Arc::new(AppState::new(
        backend,
        config.clock,
        auth,
        Duration::from_secs(config.session_ttl_secs),
    ));

    // ── Background task: expire idle wizard sessions and old revocations ──
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(SESSION_SWEEP_SECS));
        loop {
            interval.tick().await;
            let expired = sweep_state.sessions.sweep();
            if expired > 0 {
                tracing::info!("expired {} idle booking session(s)", expired);
            }
            sweep_state.auth.sweep(chrono::Utc::now().timestamp());
        }
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = match &config.webapp_url {
        Some(webapp_url) => {
            let origins: Vec<axum::http::HeaderValue> = vec![
                webapp_url
                    .parse()
                    .context("WEBAPP_URL must be a valid header value")?,
                // Vite dev server
                axum::http::HeaderValue::from_static("http://localhost:5173"),
            ];
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = routes::router(state, &rate_limiter).layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(
        "salon booking server starting on {} (business time UTC{})",
        addr,
        config.clock.offset()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
