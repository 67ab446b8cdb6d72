//! The booking wizard over HTTP. Each call addresses one session by id and
//! returns the resulting [`WizardView`].

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{ok, ApiResult};
use crate::booking::availability::{DayGrid, Fetched, RangeResult, TimeBand};
use crate::booking::confirm::Receipt;
use crate::booking::steps::{EntryFlags, Step};
use crate::error::{ApiError, BookingError};
use crate::models::{
    AddServiceRequest, ApiResponse, DaySlotsQuery, EditScopeRequest, JumpStepRequest,
    OpenWizardRequest, ProfessionalRequest, PromptAnswerRequest, RangeSlotsQuery,
    SelectSlotRequest,
};
use crate::session::{WizardSession, WizardView};
use crate::AppState;

/// A superseded fetch is answered with 409 so the client simply drops it.
fn fresh<T: serde::Serialize>(fetched: Fetched<T>) -> ApiResult<T> {
    match fetched {
        Fetched::Fresh(value) => ok(value),
        Fetched::Stale => Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("superseded by a newer request")),
        )),
    }
}

fn session(state: &AppState, id: Uuid) -> Result<Arc<WizardSession>, ApiError> {
    Ok(state.sessions.get(id)?)
}

/// POST /api/wizard
pub async fn open(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenWizardRequest>,
) -> ApiResult<WizardView> {
    let services = state.catalog.services_by_id(&req.service_ids).await?;
    let flags = EntryFlags {
        skip_professional: req.skip_professional,
    };
    let session = state
        .sessions
        .insert(WizardSession::open(state.wizard_deps(), services, flags));
    tracing::info!("wizard {} opened", session.id());
    ok(session.view())
}

/// GET /api/wizard/{id}
pub async fn view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.view())
}

/// DELETE /api/wizard/{id} — unmount.
pub async fn close(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<()> {
    if !state.sessions.remove(id) {
        return Err(BookingError::NotFound(format!("booking session {id}")).into());
    }
    ok(())
}

/// POST /api/wizard/{id}/services
pub async fn add_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddServiceRequest>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.add_service(req.service_id).await?)
}

/// DELETE /api/wizard/{id}/services/{service_id}
pub async fn remove_service(
    State(state): State<Arc<AppState>>,
    Path((id, service_id)): Path<(Uuid, i64)>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.remove_service(service_id)?)
}

/// POST /api/wizard/{id}/prompt
pub async fn answer_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PromptAnswerRequest>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.answer_prompt(req.answer)?)
}

/// POST /api/wizard/{id}/edit-scope
pub async fn edit_scope(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditScopeRequest>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.choose_edit_scope(req.choice).await?)
}

/// POST /api/wizard/{id}/professional
pub async fn choose_professional(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProfessionalRequest>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?
        .choose_professional(req.professional_id)
        .await?)
}

/// GET /api/wizard/{id}/slots/day?date=YYYY-MM-DD
pub async fn day_slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<DaySlotsQuery>,
) -> ApiResult<DayGrid> {
    fresh(session(&state, id)?.day_slots(query.date).await?)
}

/// GET /api/wizard/{id}/slots/range?from=HH:MM&to=HH:MM
pub async fn range_slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RangeSlotsQuery>,
) -> ApiResult<RangeResult> {
    let band = TimeBand::parse(query.from.as_deref(), query.to.as_deref())?;
    fresh(session(&state, id)?.range_slots(band).await?)
}

/// POST /api/wizard/{id}/slot
pub async fn select_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SelectSlotRequest>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.select_slot(req.date, req.time).await?)
}

/// POST /api/wizard/{id}/step — jump back to an earlier step.
pub async fn jump(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<JumpStepRequest>,
) -> ApiResult<WizardView> {
    let step = Step::from_number(req.step)
        .ok_or_else(|| BookingError::InvalidInput(format!("no step {}", req.step)))?;
    ok(session(&state, id)?.jump(step)?)
}

/// POST /api/wizard/{id}/change-time
pub async fn change_time(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.change_time()?)
}

/// POST /api/wizard/{id}/abandon
pub async fn abandon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<WizardView> {
    ok(session(&state, id)?.abandon()?)
}

/// POST /api/wizard/{id}/confirm — needs a logged-in client.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Receipt> {
    let session = session(&state, id)?;
    let client_id = state.auth.client_id(&headers).ok();
    let receipt = session.confirm(client_id.as_deref()).await?;
    // The booking may have consumed a voucher session.
    if let Some(client_id) = &client_id {
        state.vouchers.invalidate(client_id);
    }
    if session.view().closed {
        state.sessions.remove(id);
    }
    ok(receipt)
}
