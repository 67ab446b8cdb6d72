//! Duo services: two professionals at once, booked through a promotion.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::booking::availability::week_days;
use crate::clock::BusinessClock;
use crate::error::BookingError;
use crate::models::{DuoBookingOutcome, DuoBookingRequest, Promotion};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuoWeek {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: BTreeMap<NaiveDate, Vec<DateTime<FixedOffset>>>,
    pub degraded: bool,
}

/// Monday and Sunday of the week `week_offset` weeks from now.
pub fn week_range(today: NaiveDate, week_offset: i64) -> (NaiveDate, NaiveDate) {
    let days = week_days(today, week_offset);
    (days[0].date, days[6].date)
}

/// Group slot starts by business-local day, dropping days before `today`.
pub fn group_duo_slots(
    slots: Vec<DateTime<FixedOffset>>,
    clock: &BusinessClock,
    today: NaiveDate,
) -> BTreeMap<NaiveDate, Vec<DateTime<FixedOffset>>> {
    let mut days: BTreeMap<NaiveDate, Vec<DateTime<FixedOffset>>> = BTreeMap::new();
    for slot in slots {
        let date = clock.localize(&slot).date();
        if date >= today {
            days.entry(date).or_default().push(slot);
        }
    }
    for starts in days.values_mut() {
        starts.sort();
        starts.dedup();
    }
    days
}

pub async fn duo_week(
    backend: &dyn Backend,
    clock: &BusinessClock,
    service_id: i64,
    week_offset: i64,
) -> DuoWeek {
    let today = clock.today();
    let (start, end) = week_range(today, week_offset);
    match backend.duo_slots(service_id, start, end).await {
        Ok(slots) => DuoWeek {
            start,
            end,
            days: group_duo_slots(slots, clock, today),
            degraded: false,
        },
        Err(e) => {
            tracing::error!("duo slots for service {} failed: {:#}", service_id, e);
            DuoWeek {
                start,
                end,
                days: BTreeMap::new(),
                degraded: true,
            }
        }
    }
}

/// Book a duo slot at the promotion's price.
pub async fn book_duo(
    backend: &dyn Backend,
    clock: &BusinessClock,
    client_id: &str,
    promotion: &Promotion,
    service_id: i64,
    slot_start: DateTime<FixedOffset>,
    final_price: f64,
) -> Result<DuoBookingOutcome, BookingError> {
    if !promotion.is_active {
        return Err(BookingError::NotFound(format!("promotion {}", promotion.id)));
    }
    if (final_price - promotion.promo_price).abs() > 0.005 {
        return Err(BookingError::InvalidInput(format!(
            "price {final_price} does not match promotion price {}",
            promotion.promo_price
        )));
    }
    if slot_start < clock.now() {
        return Err(BookingError::InvalidInput("slot already started".into()));
    }

    let req = DuoBookingRequest {
        client_id: client_id.to_string(),
        service_id,
        start_time: slot_start,
        promotion_id: Some(promotion.id),
        final_price,
    };
    let outcome = backend
        .create_duo_appointment_with_promo(&req)
        .await
        .map_err(|e| {
            tracing::error!("duo booking for client {} failed: {:#}", client_id, e);
            BookingError::Persistence(format!("{e:#}"))
        })?;
    if !outcome.success {
        tracing::warn!("duo booking refused: {}", outcome.message);
        return Err(BookingError::Persistence(outcome.message));
    }
    tracing::info!(
        "duo appointment booked for client {} at {} (promotion {})",
        client_id,
        slot_start,
        promotion.id
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{self, FakeBackend};
    use chrono::Duration;

    fn clock() -> BusinessClock {
        BusinessClock::from_offset_minutes(60).unwrap()
    }

    fn promo(active: bool) -> Promotion {
        Promotion {
            id: 7,
            title: "Manos a dúo".into(),
            description: String::new(),
            image_url: None,
            original_price: Some(80.0),
            promo_price: 60.0,
            is_active: active,
        }
    }

    #[test]
    fn test_week_range_is_monday_to_sunday() {
        let wed = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        assert_eq!(
            week_range(wed, 0),
            (
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 8).unwrap()
            )
        );
    }

    #[test]
    fn test_group_drops_past_days_and_sorts() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        let slots = vec![
            fake::stamp("2026-03-05T12:00:00+01:00"),
            fake::stamp("2026-03-03T10:00:00+01:00"),
            fake::stamp("2026-03-05T09:00:00+01:00"),
            fake::stamp("2026-03-04T18:00:00+01:00"),
        ];
        let days = group_duo_slots(slots, &clock(), today);
        assert_eq!(days.len(), 2);
        let thursday = &days[&NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()];
        assert_eq!(thursday[0], fake::stamp("2026-03-05T09:00:00+01:00"));
    }

    #[tokio::test]
    async fn test_duo_week_degrades_on_failure() {
        let backend = FakeBackend::new();
        backend.state().fail.insert("duo_slots");
        let week = duo_week(&backend, &clock(), 3, 0).await;
        assert!(week.degraded);
        assert!(week.days.is_empty());
    }

    #[tokio::test]
    async fn test_book_duo_uses_promotion() {
        let backend = FakeBackend::new();
        let start = clock().now() + Duration::days(2);
        let outcome = book_duo(&backend, &clock(), "c1", &promo(true), 3, start, 60.0)
            .await
            .unwrap();
        assert!(outcome.success);
        let sent = backend.state().duo_bookings[0].clone();
        assert_eq!(sent.promotion_id, Some(7));
        assert_eq!(sent.start_time, start);
    }

    #[tokio::test]
    async fn test_book_duo_rejects_bad_input() {
        let backend = FakeBackend::new();
        let later = clock().now() + Duration::days(2);
        assert!(matches!(
            book_duo(&backend, &clock(), "c1", &promo(true), 3, later, 10.0).await,
            Err(BookingError::InvalidInput(_))
        ));
        assert!(matches!(
            book_duo(&backend, &clock(), "c1", &promo(false), 3, later, 60.0).await,
            Err(BookingError::NotFound(_))
        ));
        let earlier = clock().now() - Duration::hours(1);
        assert!(matches!(
            book_duo(&backend, &clock(), "c1", &promo(true), 3, earlier, 60.0).await,
            Err(BookingError::InvalidInput(_))
        ));
        assert!(backend.state().duo_bookings.is_empty());
    }
}
