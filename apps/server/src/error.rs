use axum::{http::StatusCode, Json};
use thiserror::Error;

use crate::models::ApiResponse;

/// Generic retry-suggesting message shown for failed writes.
pub const RETRY_MESSAGE: &str =
    "Error de conexión: No hemos podido procesar tu solicitud. Por favor, inténtalo de nuevo.";

/// Domain-level failures of the booking flow.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Resolving a service/professional (edit setup, catalogue) failed.
    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("group edit needs one service per appointment (appointments: {appointments}, services: {services})")]
    GroupMismatch { appointments: usize, services: usize },

    #[error("missing booking data: {0}")]
    MissingData(&'static str),

    #[error("write failed: {0}")]
    Persistence(String),

    /// Some writes of a multi-appointment operation failed; the ones that
    /// succeeded were compensated (`compensated` of them successfully).
    #[error("{failed} of {total} appointment writes failed ({compensated} rolled back)")]
    PartialWrite {
        failed: usize,
        total: usize,
        compensated: usize,
    },

    #[error("login or register to continue")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl BookingError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Lookup(_) => StatusCode::BAD_GATEWAY,
            Self::GroupMismatch { .. } | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::MissingData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Persistence(_) | Self::PartialWrite { .. } => StatusCode::BAD_GATEWAY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Text safe to show to the customer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Persistence(_) | Self::PartialWrite { .. } => RETRY_MESSAGE.to_string(),
            Self::MissingData(_) => "Faltan datos de la reserva.".to_string(),
            Self::Unauthorized => "Inicia sesión o regístrate para continuar.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        (err.status(), Json(ApiResponse::error(err.user_message())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failures_share_retry_message() {
        let partial = BookingError::PartialWrite {
            failed: 1,
            total: 3,
            compensated: 2,
        };
        assert_eq!(partial.user_message(), RETRY_MESSAGE);
        assert_eq!(
            BookingError::Persistence("timeout".into()).user_message(),
            RETRY_MESSAGE
        );
    }

    #[test]
    fn test_partial_write_display() {
        let err = BookingError::PartialWrite {
            failed: 1,
            total: 3,
            compensated: 2,
        };
        assert_eq!(err.to_string(), "1 of 3 appointment writes failed (2 rolled back)");
    }

    #[test]
    fn test_into_api_error() {
        let (status, body) = ApiError::from(BookingError::Unauthorized);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!body.0.ok);
    }
}
