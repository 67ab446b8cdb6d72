use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::booking::duo::{self, DuoWeek};
use crate::error::BookingError;
use crate::models::{DuoBookRequest, DuoBookingOutcome, DuoSlotsQuery, Promotion};
use crate::AppState;

async fn active_promotions(state: &AppState) -> Result<Vec<Promotion>, BookingError> {
    state.backend.active_promotions().await.map_err(|e| {
        tracing::error!("loading promotions failed: {:#}", e);
        BookingError::Lookup(format!("{e:#}"))
    })
}

async fn active_promotion(state: &AppState, id: i64) -> Result<Promotion, BookingError> {
    active_promotions(state)
        .await?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| BookingError::NotFound(format!("promotion {id}")))
}

/// GET /api/promotions
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Promotion>> {
    ok(active_promotions(&state).await?)
}

/// GET /api/promotions/{id}/duo-slots?service_id=&week_offset=
pub async fn duo_slots(
    State(state): State<Arc<AppState>>,
    Path(promotion_id): Path<i64>,
    Query(query): Query<DuoSlotsQuery>,
) -> ApiResult<DuoWeek> {
    active_promotion(&state, promotion_id).await?;
    ok(duo::duo_week(
        state.backend.as_ref(),
        &state.clock,
        query.service_id,
        query.week_offset,
    )
    .await)
}

/// POST /api/promotions/{id}/duo-book
pub async fn duo_book(
    State(state): State<Arc<AppState>>,
    Path(promotion_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<DuoBookRequest>,
) -> ApiResult<DuoBookingOutcome> {
    let client_id = state.auth.client_id(&headers)?;
    let promotion = active_promotion(&state, promotion_id).await?;
    let outcome = duo::book_duo(
        state.backend.as_ref(),
        &state.clock,
        &client_id,
        &promotion,
        req.service_id,
        req.slot_start,
        req.final_price,
    )
    .await?;
    ok(outcome)
}
