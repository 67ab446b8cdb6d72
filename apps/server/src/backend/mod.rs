//! Boundary to the remote data/availability backend.
//!
//! Everything the booking flow knows about persistence, identity and slot
//! computation goes through [`Backend`]. The production implementation is
//! [`rest::RestBackend`]; tests use an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{
    Appointment, AppointmentWrite, AuthSession, ClientBono, DuoBookingOutcome,
    DuoBookingRequest, Professional, Promotion, Service, WorkdayBounds,
};

#[cfg(test)]
pub mod fake;
pub mod rest;

/// Bookable slot as returned by the single-day procedures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDaySlot {
    /// `HH:MM:SS`.
    pub slot_time: String,
    pub professional_id: String,
}

/// Bookable slot as returned by the ranged procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRangeSlot {
    pub slot_timestamp: DateTime<FixedOffset>,
    pub professional_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySlotsRequest {
    pub service_ids: Vec<i64>,
    pub professional_id: Option<String>,
    pub date: NaiveDate,
    /// Appointments being edited; the backend must not count them as conflicts.
    pub ignore_appointment_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeSlotsRequest {
    pub service_ids: Vec<i64>,
    pub professional_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub ignore_appointment_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn health_check(&self) -> anyhow::Result<()>;

    // ── Reference data ──

    /// All services, without `professional_ids` filled in.
    async fn services(&self) -> anyhow::Result<Vec<Service>>;
    async fn service(&self, id: i64) -> anyhow::Result<Service>;
    async fn professionals(&self) -> anyhow::Result<Vec<Professional>>;
    async fn professional(&self, id: &str) -> anyhow::Result<Professional>;
    async fn qualified_professionals(&self, service_id: i64) -> anyhow::Result<Vec<String>>;

    // ── Availability ──

    async fn professional_workday_bounds(
        &self,
        professional_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>>;
    async fn service_workday_bounds(
        &self,
        service_id: i64,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>>;
    async fn available_slots(&self, req: &DaySlotsRequest) -> anyhow::Result<Vec<RawDaySlot>>;
    async fn available_slots_for_range(
        &self,
        req: &RangeSlotsRequest,
    ) -> anyhow::Result<Vec<RawRangeSlot>>;
    async fn duo_slots(
        &self,
        service_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<DateTime<FixedOffset>>>;

    // ── Appointments ──

    async fn create_appointment(&self, write: &AppointmentWrite) -> anyhow::Result<Appointment>;
    async fn update_appointment(&self, id: &str, write: &AppointmentWrite) -> anyhow::Result<()>;
    async fn cancel_appointment(&self, id: &str) -> anyhow::Result<()>;
    async fn appointment(&self, id: &str) -> anyhow::Result<Appointment>;
    async fn client_appointments(&self, client_id: &str) -> anyhow::Result<Vec<Appointment>>;
    /// Non-cancelled appointments sharing `group_id`, ascending by start.
    async fn group_appointments(&self, group_id: &str) -> anyhow::Result<Vec<Appointment>>;
    async fn create_duo_appointment_with_promo(
        &self,
        req: &DuoBookingRequest,
    ) -> anyhow::Result<DuoBookingOutcome>;

    // ── Vouchers & promotions ──

    /// Through the `get_client_active_bonos` procedure.
    async fn client_active_bonos(&self, client_id: &str) -> anyhow::Result<Vec<ClientBono>>;
    /// Direct table read; `active` selects remaining > 0, otherwise remaining <= 0.
    async fn client_bonos(&self, client_id: &str, active: bool) -> anyhow::Result<Vec<ClientBono>>;
    async fn active_promotions(&self) -> anyhow::Result<Vec<Promotion>>;

    // ── Identity ──

    async fn sign_in(&self, email: &str, password: &str) -> anyhow::Result<AuthSession>;
    async fn sign_up(&self, form: &SignUp) -> anyhow::Result<AuthSession>;
    async fn sign_out(&self, access_token: &str) -> anyhow::Result<()>;
}
