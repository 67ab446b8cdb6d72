use anyhow::Context;

use crate::clock::BusinessClock;

/// Runtime configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub backend_api_key: String,
    pub session_secret: String,
    pub host: String,
    pub port: u16,
    pub clock: BusinessClock,
    pub webapp_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub session_ttl_secs: u64,
    pub token_ttl_secs: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };
        let optional = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let offset_minutes: i32 = optional("BUSINESS_UTC_OFFSET_MINUTES")
            .unwrap_or_else(|| "60".into())
            .parse()
            .context("BUSINESS_UTC_OFFSET_MINUTES must be a number")?;
        let clock = BusinessClock::from_offset_minutes(offset_minutes)
            .context("BUSINESS_UTC_OFFSET_MINUTES is out of range")?;

        Ok(Self {
            backend_url: required("BACKEND_URL")?,
            backend_api_key: required("BACKEND_API_KEY")?,
            session_secret: required("SESSION_SECRET")?,
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: optional("PORT")
                .unwrap_or_else(|| "3000".into())
                .parse()
                .context("PORT must be a number")?,
            clock,
            webapp_url: optional("WEBAPP_URL"),
            alert_webhook_url: optional("ALERT_WEBHOOK_URL"),
            session_ttl_secs: optional("SESSION_TTL_SECS")
                .unwrap_or_else(|| "3600".into())
                .parse()
                .context("SESSION_TTL_SECS must be a number")?,
            token_ttl_secs: optional("TOKEN_TTL_SECS")
                .unwrap_or_else(|| "604800".into())
                .parse()
                .context("TOKEN_TTL_SECS must be a number")?,
        })
    }
}
