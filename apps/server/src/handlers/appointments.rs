use axum::{
    extract::{Path, State},
    http::HeaderMap,
};
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::booking::profile::{self, History, CANCELLED_MESSAGE};
use crate::error::BookingError;
use crate::models::AppointmentStatus;
use crate::session::{WizardSession, WizardView};
use crate::AppState;

/// GET /api/appointments/my — upcoming and past appointments.
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<History> {
    let client_id = state.auth.client_id(&headers)?;
    ok(profile::history(state.backend.as_ref(), &state.clock, &client_id).await?)
}

/// POST /api/appointments/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<&'static str> {
    let client_id = state.auth.client_id(&headers)?;
    profile::cancel(state.backend.as_ref(), &client_id, &id).await?;
    ok(CANCELLED_MESSAGE)
}

/// POST /api/appointments/{id}/edit — opens an edit session. When the
/// appointment belongs to a booking group, the session starts on the
/// edit-scope prompt.
pub async fn edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<WizardView> {
    let client_id = state.auth.client_id(&headers)?;
    let appointment = profile::owned_appointment(state.backend.as_ref(), &client_id, &id).await?;
    if appointment.status != AppointmentStatus::Confirmed {
        return Err(BookingError::InvalidInput("only confirmed appointments can be changed".into()).into());
    }

    let group = profile::edit_group(&state.catalog, &appointment).await;
    let session =
        WizardSession::open_edit(state.wizard_deps(), client_id, appointment, group).await?;
    let session = state.sessions.insert(session);
    tracing::info!("edit session {} opened for appointment {}", session.id(), id);
    ok(session.view())
}
