//! Session tokens for customers who logged in through the identity provider.
//!
//! Token format: `<client_id>.<expires_unix>.<hex hmac-sha256>`, signed over
//! `<client_id>.<expires_unix>` with the configured secret.

use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BookingError;

type HmacSha256 = Hmac<Sha256>;

pub struct Authenticator {
    mac: HmacSha256,
    ttl_secs: i64,
    /// Logged-out tokens until they would have expired anyway.
    revoked: DashMap<String, i64>,
    /// Identity-provider access token (and expiry) per issued token.
    upstream: DashMap<String, (String, i64)>,
}

impl Authenticator {
    pub fn new(secret: &[u8], ttl_secs: i64) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("invalid session secret: {e}"))?;
        Ok(Self {
            mac,
            ttl_secs,
            revoked: DashMap::new(),
            upstream: DashMap::new(),
        })
    }

    fn signature(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    pub fn issue(&self, client_id: &str, now: i64) -> String {
        let payload = format!("{}.{}", client_id, now + self.ttl_secs);
        let sig = hex::encode(self.signature(&payload).finalize().into_bytes());
        format!("{payload}.{sig}")
    }

    /// Issue a token tied to an identity-provider session.
    pub fn issue_linked(&self, client_id: &str, access_token: String, now: i64) -> String {
        let token = self.issue(client_id, now);
        self.upstream
            .insert(token.clone(), (access_token, now + self.ttl_secs));
        token
    }

    /// `(client_id, expires)` if the token is authentic, unexpired and not revoked.
    pub fn verify(&self, token: &str, now: i64) -> Option<(String, i64)> {
        let mut parts = token.rsplitn(3, '.');
        let sig = parts.next()?;
        let expires_str = parts.next()?;
        let client_id = parts.next()?;
        if client_id.is_empty() {
            return None;
        }

        let sig = hex::decode(sig).ok()?;
        let payload = format!("{client_id}.{expires_str}");
        if self.signature(&payload).verify_slice(&sig).is_err() {
            tracing::warn!("session token signature mismatch");
            return None;
        }

        let expires: i64 = expires_str.parse().ok()?;
        if expires <= now || self.revoked.contains_key(token) {
            return None;
        }
        Some((client_id.to_string(), expires))
    }

    /// Client id from `Authorization: Bearer <token>`.
    pub fn client_id(&self, headers: &HeaderMap) -> Result<String, BookingError> {
        let token = bearer(headers).ok_or(BookingError::Unauthorized)?;
        self.verify(token, chrono::Utc::now().timestamp())
            .map(|(id, _)| id)
            .ok_or(BookingError::Unauthorized)
    }

    /// Revoke the bearer token. Returns the upstream access token to sign out.
    pub fn revoke(&self, headers: &HeaderMap) -> Result<Option<String>, BookingError> {
        let token = bearer(headers).ok_or(BookingError::Unauthorized)?;
        let (client_id, expires) = self
            .verify(token, chrono::Utc::now().timestamp())
            .ok_or(BookingError::Unauthorized)?;
        self.revoked.insert(token.to_string(), expires);
        tracing::info!("client {} logged out", client_id);
        Ok(self.upstream.remove(token).map(|(_, (access, _))| access))
    }

    /// Forget revocations and upstream links past their expiry.
    pub fn sweep(&self, now: i64) {
        self.revoked.retain(|_, expires| *expires > now);
        self.upstream.retain(|_, (_, expires)| *expires > now);
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NOW: i64 = 1_780_000_000;

    fn auth() -> Authenticator {
        Authenticator::new(b"test-secret", 3600).unwrap()
    }

    fn headers(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        h
    }

    #[test]
    fn test_issue_then_verify() {
        let a = auth();
        let token = a.issue("c-42", NOW);
        assert_eq!(a.verify(&token, NOW + 10), Some(("c-42".into(), NOW + 3600)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let a = auth();
        let token = a.issue("c-42", NOW);
        assert_eq!(a.verify(&token, NOW + 3600), None);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let a = auth();
        let token = a.issue("c-42", NOW);
        let forged = token.replacen("c-42", "c-43", 1);
        assert_eq!(a.verify(&forged, NOW), None);
        assert_eq!(a.verify("garbage", NOW), None);

        let other = Authenticator::new(b"other-secret", 3600).unwrap();
        assert_eq!(other.verify(&token, NOW), None);
    }

    #[test]
    fn test_header_extraction() {
        let a = auth();
        let token = a.issue("c-1", chrono::Utc::now().timestamp());
        assert_eq!(a.client_id(&headers(&token)).unwrap(), "c-1");
        assert!(matches!(
            a.client_id(&HeaderMap::new()),
            Err(BookingError::Unauthorized)
        ));
    }

    #[test]
    fn test_revoke_blocks_token_and_returns_upstream() {
        let a = auth();
        let token = a.issue_linked("c-1", "upstream-access".into(), chrono::Utc::now().timestamp());
        assert_eq!(
            a.revoke(&headers(&token)).unwrap(),
            Some("upstream-access".to_string())
        );
        assert!(a.client_id(&headers(&token)).is_err());
    }

    #[test]
    fn test_sweep_forgets_expired_revocations() {
        let a = auth();
        a.revoked.insert("old".into(), NOW - 1);
        a.revoked.insert("live".into(), NOW + 100);
        let linked = a.issue_linked("c-1", "acc".into(), NOW - 7200);
        a.sweep(NOW);
        assert!(!a.revoked.contains_key("old"));
        assert!(a.revoked.contains_key("live"));
        assert!(!a.upstream.contains_key(&linked));
    }
}
