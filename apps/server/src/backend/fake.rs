//! In-memory [`Backend`] for tests: canned data, recorded writes,
//! switchable failures.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use super::{Backend, DaySlotsRequest, RangeSlotsRequest, RawDaySlot, RawRangeSlot, SignUp};
use crate::models::{
    Appointment, AppointmentStatus, AppointmentWrite, AuthSession, Client, ClientBono,
    DuoBookingOutcome, DuoBookingRequest, Professional, Promotion, Service, WorkdayBounds,
};

#[derive(Default)]
pub struct FakeState {
    pub services: Vec<Service>,
    pub professionals: Vec<Professional>,
    pub skills: HashMap<i64, Vec<String>>,
    pub professional_bounds: HashMap<(String, NaiveDate), WorkdayBounds>,
    pub service_bounds: HashMap<(i64, NaiveDate), WorkdayBounds>,
    pub day_slots: Vec<RawDaySlot>,
    pub range_slots: Vec<RawRangeSlot>,
    pub duo_slots: Vec<DateTime<FixedOffset>>,
    pub appointments: Vec<Appointment>,
    pub active_bonos: Vec<ClientBono>,
    pub expired_bonos: Vec<ClientBono>,
    pub promotions: Vec<Promotion>,
    pub clients: Vec<(String, String, Client)>,

    /// Names of trait methods that should fail.
    pub fail: HashSet<&'static str>,
    /// Appointment ids whose update fails.
    pub fail_update_ids: HashSet<String>,
    /// Create calls (1-based) that fail.
    pub fail_create_calls: HashSet<usize>,

    pub calls: Vec<&'static str>,
    pub day_requests: Vec<DaySlotsRequest>,
    pub range_requests: Vec<RangeSlotsRequest>,
    pub created: Vec<AppointmentWrite>,
    pub updates: Vec<(String, AppointmentWrite)>,
    pub cancelled: Vec<String>,
    pub duo_bookings: Vec<DuoBookingRequest>,
    pub signed_out: Vec<String>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    /// When set, `service()` parks until notified.
    pub lookup_gate: Option<Arc<Notify>>,
    /// When set, `professional()` parks until notified.
    pub professional_gate: Option<Arc<Notify>>,
    /// When set, `available_slots()` parks until notified.
    pub slots_gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(gate: Arc<Notify>) -> Self {
        Self {
            lookup_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn with_professional_gate(gate: Arc<Notify>) -> Self {
        Self {
            professional_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn with_slots_gate(gate: Arc<Notify>) -> Self {
        Self {
            slots_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn enter(&self, call: &'static str) -> anyhow::Result<()> {
        let mut s = self.state();
        s.calls.push(call);
        if s.fail.contains(call) {
            anyhow::bail!("{} failed (fake)", call);
        }
        Ok(())
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn health_check(&self) -> anyhow::Result<()> {
        self.enter("health_check")
    }

    async fn services(&self) -> anyhow::Result<Vec<Service>> {
        self.enter("services")?;
        Ok(self.state().services.clone())
    }

    async fn service(&self, id: i64) -> anyhow::Result<Service> {
        if let Some(gate) = &self.lookup_gate {
            gate.notified().await;
        }
        self.enter("service")?;
        self.state()
            .services
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("service {} not found", id))
    }

    async fn professionals(&self) -> anyhow::Result<Vec<Professional>> {
        self.enter("professionals")?;
        Ok(self.state().professionals.clone())
    }

    async fn professional(&self, id: &str) -> anyhow::Result<Professional> {
        if let Some(gate) = &self.professional_gate {
            gate.notified().await;
        }
        self.enter("professional")?;
        self.state()
            .professionals
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("professional {} not found", id))
    }

    async fn qualified_professionals(&self, service_id: i64) -> anyhow::Result<Vec<String>> {
        self.enter("qualified_professionals")?;
        Ok(self
            .state()
            .skills
            .get(&service_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn professional_workday_bounds(
        &self,
        professional_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>> {
        self.enter("professional_workday_bounds")?;
        Ok(self
            .state()
            .professional_bounds
            .get(&(professional_id.to_string(), date))
            .cloned())
    }

    async fn service_workday_bounds(
        &self,
        service_id: i64,
        date: NaiveDate,
    ) -> anyhow::Result<Option<WorkdayBounds>> {
        self.enter("service_workday_bounds")?;
        Ok(self.state().service_bounds.get(&(service_id, date)).cloned())
    }

    async fn available_slots(&self, req: &DaySlotsRequest) -> anyhow::Result<Vec<RawDaySlot>> {
        self.state().day_requests.push(req.clone());
        if let Some(gate) = &self.slots_gate {
            gate.notified().await;
        }
        self.enter("available_slots")?;
        Ok(self.state().day_slots.clone())
    }

    async fn available_slots_for_range(
        &self,
        req: &RangeSlotsRequest,
    ) -> anyhow::Result<Vec<RawRangeSlot>> {
        self.state().range_requests.push(req.clone());
        self.enter("available_slots_for_range")?;
        Ok(self.state().range_slots.clone())
    }

    async fn duo_slots(
        &self,
        _service_id: i64,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> anyhow::Result<Vec<DateTime<FixedOffset>>> {
        self.enter("duo_slots")?;
        Ok(self.state().duo_slots.clone())
    }

    async fn create_appointment(&self, write: &AppointmentWrite) -> anyhow::Result<Appointment> {
        self.enter("create_appointment")?;
        let mut s = self.state();
        let call = s.calls.iter().filter(|c| **c == "create_appointment").count();
        if s.fail_create_calls.contains(&call) {
            anyhow::bail!("create #{} failed (fake)", call);
        }
        s.created.push(write.clone());
        let appt = Appointment {
            id: format!("new-{}", s.created.len()),
            client_id: Some(write.client_id.clone()),
            service_id: write.service_id,
            professional_id: write.professional_id.clone(),
            start: write.start_time,
            end: write.end_time,
            status: write.status,
            booking_group_id: write.booking_group_id,
        };
        s.appointments.push(appt.clone());
        Ok(appt)
    }

    async fn update_appointment(&self, id: &str, write: &AppointmentWrite) -> anyhow::Result<()> {
        self.enter("update_appointment")?;
        let mut s = self.state();
        if s.fail_update_ids.contains(id) {
            anyhow::bail!("update {} failed (fake)", id);
        }
        s.updates.push((id.to_string(), write.clone()));
        Ok(())
    }

    async fn cancel_appointment(&self, id: &str) -> anyhow::Result<()> {
        self.enter("cancel_appointment")?;
        let mut s = self.state();
        s.cancelled.push(id.to_string());
        if let Some(a) = s.appointments.iter_mut().find(|a| a.id == id) {
            a.status = AppointmentStatus::Cancelled;
        }
        Ok(())
    }

    async fn appointment(&self, id: &str) -> anyhow::Result<Appointment> {
        self.enter("appointment")?;
        self.state()
            .appointments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("appointment {} not found", id))
    }

    async fn client_appointments(&self, client_id: &str) -> anyhow::Result<Vec<Appointment>> {
        self.enter("client_appointments")?;
        Ok(self
            .state()
            .appointments
            .iter()
            .filter(|a| a.client_id.as_deref() == Some(client_id))
            .cloned()
            .collect())
    }

    async fn group_appointments(&self, group_id: &str) -> anyhow::Result<Vec<Appointment>> {
        self.enter("group_appointments")?;
        let mut group: Vec<Appointment> = self
            .state()
            .appointments
            .iter()
            .filter(|a| {
                a.status != AppointmentStatus::Cancelled
                    && a.booking_group_id.map(|g| g.to_string()).as_deref() == Some(group_id)
            })
            .cloned()
            .collect();
        group.sort_by_key(|a| a.start);
        Ok(group)
    }

    async fn create_duo_appointment_with_promo(
        &self,
        req: &DuoBookingRequest,
    ) -> anyhow::Result<DuoBookingOutcome> {
        self.enter("create_duo_appointment_with_promo")?;
        self.state().duo_bookings.push(req.clone());
        Ok(DuoBookingOutcome {
            success: true,
            message: "Cita dúo creada".into(),
        })
    }

    async fn client_active_bonos(&self, _client_id: &str) -> anyhow::Result<Vec<ClientBono>> {
        self.enter("client_active_bonos")?;
        Ok(self.state().active_bonos.clone())
    }

    async fn client_bonos(&self, _client_id: &str, active: bool) -> anyhow::Result<Vec<ClientBono>> {
        self.enter("client_bonos")?;
        let s = self.state();
        Ok(if active {
            s.active_bonos.clone()
        } else {
            s.expired_bonos.clone()
        })
    }

    async fn active_promotions(&self) -> anyhow::Result<Vec<Promotion>> {
        self.enter("active_promotions")?;
        Ok(self
            .state()
            .promotions
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn sign_in(&self, email: &str, password: &str) -> anyhow::Result<AuthSession> {
        self.enter("sign_in")?;
        self.state()
            .clients
            .iter()
            .find(|(e, p, _)| e == email && p == password)
            .map(|(_, _, client)| AuthSession {
                access_token: format!("access-{}", client.id),
                client: client.clone(),
            })
            .ok_or_else(|| anyhow::anyhow!("invalid credentials"))
    }

    async fn sign_up(&self, form: &SignUp) -> anyhow::Result<AuthSession> {
        self.enter("sign_up")?;
        let mut s = self.state();
        let client = Client {
            id: format!("client-{}", s.clients.len() + 1),
            user_id: None,
            full_name: form.full_name.clone(),
            phone: form.phone.clone(),
            email: form.email.clone(),
            nickname: None,
        };
        s.clients
            .push((form.email.clone(), form.password.clone(), client.clone()));
        Ok(AuthSession {
            access_token: format!("access-{}", client.id),
            client,
        })
    }

    async fn sign_out(&self, access_token: &str) -> anyhow::Result<()> {
        self.enter("sign_out")?;
        self.state().signed_out.push(access_token.to_string());
        Ok(())
    }
}

// ── Fixtures ──

pub fn service(id: i64, name: &str, duration: i64, price: f64) -> Service {
    Service {
        id,
        name: name.to_string(),
        category: "Manos".to_string(),
        description: String::new(),
        duration,
        price,
        professional_ids: vec!["P1".into(), "P2".into()],
    }
}

pub fn professional(id: &str, name: &str) -> Professional {
    Professional {
        id: id.to_string(),
        full_name: name.to_string(),
        avatar_url: None,
        specialties: vec![],
    }
}

pub fn stamp(rfc3339: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap()
}

pub fn appointment(id: &str, service_id: i64, start: &str, end: &str) -> Appointment {
    Appointment {
        id: id.to_string(),
        client_id: Some("c1".into()),
        service_id,
        professional_id: Some("P1".into()),
        start: stamp(start),
        end: stamp(end),
        status: AppointmentStatus::Confirmed,
        booking_group_id: None,
    }
}
