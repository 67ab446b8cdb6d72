use axum::extract::{Query, State};
use serde::Serialize;
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::booking::availability::{time_band_options, week_days, TimeBand, WeekDay};
use crate::booking::catalog::{categories, filter_services, qualified_for};
use crate::error::BookingError;
use crate::models::{Professional, ProfessionalsQuery, Service, ServicesQuery, WeekQuery};
use crate::AppState;

/// GET /api/services?category=&q= — catalogue with category filter and name search.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServicesQuery>,
) -> ApiResult<Vec<Service>> {
    let services = state.catalog.services().await?;
    let matching = filter_services(&services, query.category.as_deref(), query.q.as_deref())
        .into_iter()
        .cloned()
        .collect();
    ok(matching)
}

/// GET /api/categories
pub async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    let services = state.catalog.services().await?;
    ok(categories(&services))
}

fn parse_ids(raw: Option<&str>) -> Result<Vec<i64>, BookingError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| BookingError::InvalidInput(format!("bad service id {s:?}")))
        })
        .collect()
}

/// GET /api/professionals?service_ids=1,2 — those qualified for every listed service.
pub async fn list_professionals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProfessionalsQuery>,
) -> ApiResult<Vec<Professional>> {
    let ids = parse_ids(query.service_ids.as_deref())?;
    let professionals = state.catalog.professionals().await?;
    if ids.is_empty() {
        return ok(professionals);
    }
    let services = state.catalog.services_by_id(&ids).await?;
    ok(qualified_for(&professionals, &services).into_iter().cloned().collect())
}

/// GET /api/calendar/week?week_offset=N — the Monday-based day strip.
pub async fn week(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeekQuery>,
) -> ApiResult<Vec<WeekDay>> {
    ok(week_days(state.clock.today(), query.week_offset))
}

#[derive(Serialize)]
pub struct TimeBands {
    pub options: Vec<String>,
    pub default: TimeBand,
}

/// GET /api/calendar/time-bands
pub async fn time_bands() -> ApiResult<TimeBands> {
    ok(TimeBands {
        options: time_band_options(),
        default: TimeBand::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids(Some("1, 2,,3")).unwrap(), vec![1, 2, 3]);
        assert!(parse_ids(None).unwrap().is_empty());
        assert!(matches!(
            parse_ids(Some("1,x")),
            Err(BookingError::InvalidInput(_))
        ));
    }
}
