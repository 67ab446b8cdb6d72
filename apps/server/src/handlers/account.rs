use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::backend::SignUp;
use crate::error::BookingError;
use crate::models::{AuthSession, LoginRequest, LoginResponse, RegisterRequest};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 6;

fn issue(state: &AppState, session: AuthSession) -> LoginResponse {
    let token = state.auth.issue_linked(
        &session.client.id,
        session.access_token,
        chrono::Utc::now().timestamp(),
    );
    LoginResponse {
        token,
        client: session.client,
    }
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let session = state
        .backend
        .sign_in(req.email.trim(), &req.password)
        .await
        .map_err(|e| {
            tracing::warn!("login for {} failed: {:#}", req.email, e);
            BookingError::Unauthorized
        })?;
    tracing::info!("client {} logged in", session.client.id);
    ok(issue(&state, session))
}

fn validate(req: &RegisterRequest) -> Result<(), BookingError> {
    if req.full_name.trim().is_empty() {
        return Err(BookingError::InvalidInput("full name is required".into()));
    }
    if !req.email.contains('@') {
        return Err(BookingError::InvalidInput("email address is not valid".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(BookingError::InvalidInput(format!(
            "password needs at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// POST /api/auth/register — creates the account and logs in.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<LoginResponse> {
    validate(&req)?;
    let form = SignUp {
        email: req.email.trim().to_string(),
        password: req.password,
        full_name: req.full_name.trim().to_string(),
        phone: req.phone.filter(|p| !p.trim().is_empty()),
    };
    let session = state.backend.sign_up(&form).await.map_err(|e| {
        tracing::warn!("registration for {} failed: {:#}", form.email, e);
        BookingError::InvalidInput("registration could not be completed".into())
    })?;
    tracing::info!("client {} registered", session.client.id);
    ok(issue(&state, session))
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<()> {
    if let Some(access_token) = state.auth.revoke(&headers)? {
        if let Err(e) = state.backend.sign_out(&access_token).await {
            tracing::warn!("upstream sign-out failed: {:#}", e);
        }
    }
    ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            full_name: name.into(),
            phone: None,
        }
    }

    #[test]
    fn test_register_validation() {
        assert!(validate(&form("Ana", "ana@example.com", "secreto")).is_ok());
        assert!(validate(&form(" ", "ana@example.com", "secreto")).is_err());
        assert!(validate(&form("Ana", "ana.example.com", "secreto")).is_err());
        assert!(validate(&form("Ana", "ana@example.com", "corta")).is_err());
    }
}
