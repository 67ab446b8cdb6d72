use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::booking::steps::EntryFlags;
use crate::booking::vouchers::VoucherList;
use crate::models::{Service, VoucherBookRequest, VouchersQuery};
use crate::session::{WizardSession, WizardView};
use crate::AppState;

/// GET /api/vouchers?status=active|expired&refresh=bool
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VouchersQuery>,
    headers: HeaderMap,
) -> ApiResult<VoucherList> {
    let client_id = state.auth.client_id(&headers)?;
    let list = match query.status.as_deref() {
        Some("expired") => state.vouchers.expired(&client_id).await,
        _ => state.vouchers.active(&client_id, query.refresh).await,
    };
    ok(list)
}

/// Sessions are prepaid: price 0. Qualified professionals come from the
/// catalogue since voucher rows do not carry them.
async fn as_prepaid(state: &AppState, services: Vec<Service>) -> Vec<Service> {
    let catalogue = state.catalog.services().await.ok();
    services
        .into_iter()
        .map(|mut s| {
            if let Some(known) = catalogue.as_ref().and_then(|c| c.iter().find(|c| c.id == s.id)) {
                s.professional_ids = known.professional_ids.clone();
                if s.duration <= 0 {
                    s.duration = known.duration;
                }
            }
            s.price = 0.0;
            s
        })
        .collect()
}

/// POST /api/vouchers/{id}/book — opens a wizard seeded with the voucher's services.
pub async fn book(
    State(state): State<Arc<AppState>>,
    Path(voucher_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<VoucherBookRequest>,
) -> ApiResult<WizardView> {
    let client_id = state.auth.client_id(&headers)?;
    let services = state
        .vouchers
        .redeemable_services(&client_id, &voucher_id, &req.service_ids)
        .await?;
    let services = as_prepaid(&state, services).await;
    let flags = EntryFlags {
        skip_professional: req.skip_professional,
    };
    let session = state
        .sessions
        .insert(WizardSession::open(state.wizard_deps(), services, flags));
    tracing::info!(
        "voucher {} opened wizard {} for client {}",
        voucher_id,
        session.id(),
        client_id
    );
    ok(session.view())
}
