//! Availability Reconciler.
//!
//! Two read modes over the backend's availability procedures:
//! - **day grid**: a 15-minute grid for one day, each cell marked
//!   available/past against the bookable set;
//! - **range by hour**: 30 days ahead, filtered to a time-of-day band and
//!   grouped by date.
//!
//! Every fetch takes a ticket; only the latest ticket's result is `Fresh`.
//! Remote failures never escape: they produce an empty, `degraded` result.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{Backend, DaySlotsRequest, RangeSlotsRequest, RawDaySlot, RawRangeSlot};
use crate::booking::store::BookingSelection;
use crate::clock::{format_hhmm, minutes_of_day, parse_hhmm, BusinessClock};
use crate::error::BookingError;
use crate::models::{Slot, SlotGroup, WorkdayBounds};

/// Display resolution of the day grid, in minutes.
pub const GRID_STEP_MINUTES: i64 = 15;
/// How far ahead the by-hour search looks, in days.
pub const RANGE_WINDOW_DAYS: i64 = 30;

pub const DEFAULT_BAND_START: &str = "08:00";
pub const DEFAULT_BAND_END: &str = "21:00";

// ── Query ──

/// What to ask the backend for, derived from the current selection.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityQuery {
    pub service_ids: Vec<i64>,
    pub professional_id: Option<String>,
    pub ignore_appointment_ids: Vec<String>,
}

impl AvailabilityQuery {
    /// `None` while no service is selected.
    pub fn from_selection(selection: &BookingSelection) -> Option<Self> {
        if selection.services.is_empty() {
            return None;
        }
        Some(Self {
            service_ids: selection.services.iter().map(|s| s.id).collect(),
            professional_id: selection.professional.as_ref().map(|p| p.id.clone()),
            ignore_appointment_ids: selection.edit_ids(),
        })
    }
}

// ── Results ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSlot {
    /// `HH:MM`.
    pub time: String,
    /// Who the backend attributed this slot to, if bookable.
    pub professional_id: Option<String>,
    pub available: bool,
    pub past: bool,
    pub selectable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayGrid {
    pub date: NaiveDate,
    pub working: bool,
    pub slots: Vec<GridSlot>,
    /// A remote call failed; `slots` is empty rather than authoritative.
    pub degraded: bool,
}

impl DayGrid {
    fn closed(date: NaiveDate, degraded: bool) -> Self {
        Self {
            date,
            working: false,
            slots: Vec::new(),
            degraded,
        }
    }

    /// The cell at `time`, if it can be booked.
    pub fn selectable_at(&self, time: &str) -> Option<&GridSlot> {
        self.slots.iter().find(|s| s.time == time && s.selectable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeResult {
    pub band: TimeBand,
    pub days: SlotGroup,
    pub degraded: bool,
}

/// Outcome of a ticketed fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Fresh(T),
    /// A newer request (or cancellation) happened while this one was in flight.
    Stale,
}

// ── Time band ──

/// Inclusive time-of-day filter for the by-hour search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBand {
    pub start: String,
    pub end: String,
}

impl Default for TimeBand {
    fn default() -> Self {
        Self {
            start: DEFAULT_BAND_START.to_string(),
            end: DEFAULT_BAND_END.to_string(),
        }
    }
}

impl TimeBand {
    /// Missing bounds fall back to the defaults. Bounds must be zero-padded
    /// `HH:MM` so that lexical comparison matches chronological order.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, BookingError> {
        fn check(value: &str) -> Result<String, BookingError> {
            if value.len() == 5 && parse_hhmm(value).is_some() {
                Ok(value.to_string())
            } else {
                Err(BookingError::InvalidInput(format!(
                    "time band bound must be HH:MM, got {value:?}"
                )))
            }
        }
        Ok(Self {
            start: check(start.unwrap_or(DEFAULT_BAND_START))?,
            end: check(end.unwrap_or(DEFAULT_BAND_END))?,
        })
    }

    pub fn contains(&self, time: &str) -> bool {
        time >= self.start.as_str() && time <= self.end.as_str()
    }
}

/// Selectable band bounds: 08:00 through 21:30 every half hour.
pub fn time_band_options() -> Vec<String> {
    (8..22)
        .flat_map(|h| [format!("{h:02}:00"), format!("{h:02}:30")])
        .collect()
}

// ── Week strip ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekDay {
    pub date: NaiveDate,
    pub selectable: bool,
}

/// Monday-based week `week_offset` weeks after the current one. Negative
/// offsets clamp to the current week; days before today are not selectable.
pub fn week_days(today: NaiveDate, week_offset: i64) -> Vec<WeekDay> {
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
        + Duration::weeks(week_offset.max(0));
    (0..7)
        .map(|i| {
            let date = monday + Duration::days(i);
            WeekDay {
                date,
                selectable: date >= today,
            }
        })
        .collect()
}

// ── Pure reconciliation ──

/// Grid cells from `bounds.start_time` (inclusive) to `bounds.end_time`
/// (exclusive). Empty for a non-working day or unusable bounds.
pub fn candidate_times(bounds: &WorkdayBounds) -> Vec<NaiveTime> {
    if !bounds.is_working {
        return Vec::new();
    }
    let (Some(start), Some(end)) = (
        bounds.start_time.as_deref().and_then(minutes_of_day),
        bounds.end_time.as_deref().and_then(minutes_of_day),
    ) else {
        return Vec::new();
    };
    let step = GRID_STEP_MINUTES as usize;
    (start..end)
        .step_by(step)
        .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
        .collect()
}

/// Unify single-day procedure rows into [`Slot`]s, dropping unparsable times.
pub fn normalize_day(raw: Vec<RawDaySlot>) -> Vec<Slot> {
    raw.into_iter()
        .filter_map(|r| {
            let time = parse_hhmm(&r.slot_time)?;
            Some(Slot {
                time: format_hhmm(time),
                professional_id: r.professional_id,
            })
        })
        .collect()
}

/// Unify ranged procedure rows into business-local `(date, Slot)` pairs.
pub fn normalize_range(raw: Vec<RawRangeSlot>, clock: &BusinessClock) -> Vec<(NaiveDate, Slot)> {
    raw.into_iter()
        .map(|r| {
            let local = clock.localize(&r.slot_timestamp);
            (
                local.date(),
                Slot {
                    time: format_hhmm(local.time()),
                    professional_id: r.professional_id,
                },
            )
        })
        .collect()
}

/// Mark every candidate cell against the bookable set. A cell is past only
/// when `date` is today and its time is before `now`.
/// A `date`/`HH:MM` slot that has already started at `now`. The current
/// minute still counts as open.
pub fn is_past(date: NaiveDate, time: &str, now: NaiveDateTime) -> bool {
    date < now.date() || (date == now.date() && time < format_hhmm(now.time()).as_str())
}

pub fn build_grid(
    date: NaiveDate,
    candidates: &[NaiveTime],
    bookable: &[Slot],
    now: NaiveDateTime,
) -> Vec<GridSlot> {
    candidates
        .iter()
        .map(|t| {
            let time = format_hhmm(*t);
            let professional_id = bookable
                .iter()
                .find(|s| s.time == time)
                .map(|s| s.professional_id.clone());
            let available = professional_id.is_some();
            let past = is_past(date, &time, now);
            GridSlot {
                time,
                professional_id,
                available,
                past,
                selectable: available && !past,
            }
        })
        .collect()
}

/// Band filter, drop days before `today`, group by date, sort, and keep the
/// first professional offered for each time.
pub fn group_range(slots: Vec<(NaiveDate, Slot)>, band: &TimeBand, today: NaiveDate) -> SlotGroup {
    let mut days = SlotGroup::new();
    for (date, slot) in slots {
        if date < today || !band.contains(&slot.time) {
            continue;
        }
        days.entry(date).or_default().push(slot);
    }
    for slots in days.values_mut() {
        // Stable: the first professional listed for a time wins.
        slots.sort_by(|a, b| a.time.cmp(&b.time));
        slots.dedup_by(|b, a| a.time == b.time);
    }
    days
}

// ── Reconciler ──

pub struct Reconciler {
    backend: Arc<dyn Backend>,
    clock: BusinessClock,
    latest: AtomicU64,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn Backend>, clock: BusinessClock) -> Self {
        Self {
            backend,
            clock,
            latest: AtomicU64::new(0),
        }
    }

    fn ticket(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn settle<T>(&self, ticket: u64, value: T) -> Fetched<T> {
        if self.latest.load(Ordering::SeqCst) == ticket {
            Fetched::Fresh(value)
        } else {
            tracing::debug!("dropping stale availability result (ticket {})", ticket);
            Fetched::Stale
        }
    }

    /// Invalidate any in-flight fetch.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    async fn bounds(
        &self,
        query: &AvailabilityQuery,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>> {
        match query.professional_id.as_deref() {
            Some(pid) => self.backend.professional_workday_bounds(pid, date).await,
            // Any professional: the first service's bounds stand for the set.
            None => {
                let first = query.service_ids.first().copied().unwrap_or_default();
                self.backend.service_workday_bounds(first, date).await
            }
        }
    }

    /// Mode A: the 15-minute grid for `date`.
    pub async fn day_grid(&self, query: &AvailabilityQuery, date: NaiveDate) -> Fetched<DayGrid> {
        let ticket = self.ticket();

        let bounds = match self.bounds(query, date).await {
            Ok(Some(b)) => b,
            Ok(None) => return self.settle(ticket, DayGrid::closed(date, false)),
            Err(e) => {
                tracing::error!("workday bounds fetch for {} failed: {:#}", date, e);
                return self.settle(ticket, DayGrid::closed(date, true));
            }
        };

        let candidates = candidate_times(&bounds);
        if candidates.is_empty() {
            return self.settle(ticket, DayGrid::closed(date, false));
        }

        let req = DaySlotsRequest {
            service_ids: query.service_ids.clone(),
            professional_id: query.professional_id.clone(),
            date,
            ignore_appointment_ids: query.ignore_appointment_ids.clone(),
        };
        let grid = match self.backend.available_slots(&req).await {
            Ok(raw) => {
                let bookable = normalize_day(raw);
                DayGrid {
                    date,
                    working: true,
                    slots: build_grid(date, &candidates, &bookable, self.clock.now().naive_local()),
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::error!("available slots fetch for {} failed: {:#}", date, e);
                DayGrid {
                    date,
                    working: true,
                    slots: Vec::new(),
                    degraded: true,
                }
            }
        };
        self.settle(ticket, grid)
    }

    /// Mode B: bookable slots over the next 30 days within `band`.
    pub async fn range_by_hour(
        &self,
        query: &AvailabilityQuery,
        band: TimeBand,
    ) -> Fetched<RangeResult> {
        let ticket = self.ticket();
        let today = self.clock.today();
        let req = RangeSlotsRequest {
            service_ids: query.service_ids.clone(),
            professional_id: query.professional_id.clone(),
            start_date: today,
            end_date: today + Duration::days(RANGE_WINDOW_DAYS),
            ignore_appointment_ids: query.ignore_appointment_ids.clone(),
        };
        let result = match self.backend.available_slots_for_range(&req).await {
            Ok(raw) => RangeResult {
                days: group_range(normalize_range(raw, &self.clock), &band, today),
                band,
                degraded: false,
            },
            Err(e) => {
                tracing::error!("range slots fetch failed: {:#}", e);
                RangeResult {
                    band,
                    days: SlotGroup::new(),
                    degraded: true,
                }
            }
        };
        self.settle(ticket, result)
    }
}
