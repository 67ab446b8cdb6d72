use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::booking::steps::{EditScopeChoice, PromptAnswer};

// ── Reference data ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// Minutes.
    pub duration: i64,
    pub price: f64,
    /// Professionals qualified to perform this service.
    #[serde(default)]
    pub professional_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Professional {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Service ids this professional can perform.
    #[serde(default)]
    pub specialties: Vec<i64>,
}

// ── Appointments ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    #[serde(rename = "confirmada", alias = "Confirmada", alias = "confirmed")]
    Confirmed,
    #[serde(rename = "completada", alias = "Completada", alias = "completed")]
    Completed,
    #[serde(rename = "cancelada", alias = "Cancelada", alias = "cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub service_id: i64,
    pub professional_id: Option<String>,
    #[serde(rename = "start_time")]
    pub start: DateTime<FixedOffset>,
    #[serde(rename = "end_time")]
    pub end: DateTime<FixedOffset>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub booking_group_id: Option<Uuid>,
}

/// Row written to the appointments table on create or update.
///
/// `booking_group_id` is always serialized so that an update to `None`
/// detaches the appointment from its former group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentWrite {
    pub client_id: String,
    pub service_id: i64,
    pub professional_id: Option<String>,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub status: AppointmentStatus,
    pub booking_group_id: Option<Uuid>,
}

impl AppointmentWrite {
    /// The write that puts `original` back the way it was.
    pub fn restoring(original: &Appointment, client_id: &str) -> Self {
        Self {
            client_id: original
                .client_id
                .clone()
                .unwrap_or_else(|| client_id.to_string()),
            service_id: original.service_id,
            professional_id: original.professional_id.clone(),
            start_time: original.start,
            end_time: original.end,
            status: original.status,
            booking_group_id: original.booking_group_id,
        }
    }
}

// ── Availability ──

/// Normalized availability unit, scoped to one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// `HH:MM`, zero-padded 24-hour.
    pub time: String,
    pub professional_id: String,
}

/// Slots per calendar day, ascending by date; each day ascending by time.
pub type SlotGroup = BTreeMap<NaiveDate, Vec<Slot>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkdayBounds {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_working: bool,
}

// ── Vouchers & promotions ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientBono {
    pub id: String,
    pub name: String,
    pub bono_type: Option<String>,
    pub remaining_sessions: i64,
    pub total_sessions: Option<i64>,
    pub purchase_date: Option<String>,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: Option<String>,
    pub original_price: Option<f64>,
    pub promo_price: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuoBookingRequest {
    pub client_id: String,
    pub service_id: i64,
    pub start_time: DateTime<FixedOffset>,
    pub promotion_id: Option<i64>,
    pub final_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuoBookingOutcome {
    pub success: bool,
    pub message: String,
}

// ── Identity ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub user_id: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: String,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub client: Client,
}

// ── API request/response types ──

#[derive(Debug, Default, Deserialize)]
pub struct ServicesQuery {
    pub category: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfessionalsQuery {
    /// Comma-separated service ids.
    pub service_ids: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenWizardRequest {
    #[serde(default)]
    pub service_ids: Vec<i64>,
    #[serde(default)]
    pub skip_professional: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddServiceRequest {
    pub service_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PromptAnswerRequest {
    pub answer: PromptAnswer,
}

#[derive(Debug, Deserialize)]
pub struct EditScopeRequest {
    pub choice: EditScopeChoice,
}

#[derive(Debug, Deserialize)]
pub struct ProfessionalRequest {
    /// `None` = any available professional.
    pub professional_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DaySlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct RangeSlotsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    #[serde(default)]
    pub week_offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct SelectSlotRequest {
    pub date: NaiveDate,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct JumpStepRequest {
    pub step: u8,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub client: Client,
}

#[derive(Debug, Default, Deserialize)]
pub struct VouchersQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct VoucherBookRequest {
    pub service_ids: Vec<i64>,
    #[serde(default)]
    pub skip_professional: bool,
}

#[derive(Debug, Deserialize)]
pub struct DuoSlotsQuery {
    pub service_id: i64,
    #[serde(default)]
    pub week_offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct DuoBookRequest {
    pub service_id: i64,
    pub slot_start: DateTime<FixedOffset>,
    pub final_price: f64,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
