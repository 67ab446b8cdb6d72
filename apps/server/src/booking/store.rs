//! Booking State Store: the in-progress selection shared by all wizard steps.
//!
//! Every mutation bumps a generation counter. The async setters capture the
//! generation before their lookups and only commit if nothing else wrote in
//! the meantime, so a stale resolution can never overwrite a newer reset.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::Backend;
use crate::clock::{format_hhmm, BusinessClock};
use crate::error::BookingError;
use crate::models::{Appointment, Professional, Service};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookingSelection {
    /// Insertion order is execution order within a group booking.
    pub services: Vec<Service>,
    /// `None` = any available professional.
    pub professional: Option<Professional>,
    pub date: Option<NaiveDate>,
    /// `HH:MM`.
    pub time: Option<String>,
    pub edit_targets: Option<Vec<Appointment>>,
}

impl BookingSelection {
    pub fn is_edit(&self) -> bool {
        self.edit_targets.as_ref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_group_edit(&self) -> bool {
        self.edit_targets.as_ref().is_some_and(|t| t.len() > 1)
    }

    /// Ids the backend must ignore when checking conflicts.
    pub fn edit_ids(&self) -> Vec<String> {
        self.edit_targets
            .iter()
            .flatten()
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn total_duration(&self) -> i64 {
        self.services.iter().map(|s| s.duration).sum()
    }

    pub fn total_price(&self) -> f64 {
        self.services.iter().map(|s| s.price).sum()
    }
}

/// Result of an async store mutation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// A newer mutation landed first; nothing was written.
    Superseded,
}

#[derive(Default)]
struct Inner {
    selection: BookingSelection,
    generation: u64,
}

pub struct BookingStore {
    inner: Mutex<Inner>,
    clock: BusinessClock,
}

impl BookingStore {
    pub fn new(clock: BusinessClock) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut BookingSelection) -> R) -> R {
        let mut inner = self.lock();
        inner.generation += 1;
        f(&mut inner.selection)
    }

    /// Start an async mutation; anything written after this supersedes it.
    fn begin(&self) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.generation
    }

    fn commit(&self, ticket: u64, selection: BookingSelection) -> EditOutcome {
        let mut inner = self.lock();
        if inner.generation != ticket {
            return EditOutcome::Superseded;
        }
        inner.generation += 1;
        inner.selection = selection;
        EditOutcome::Applied
    }

    pub fn snapshot(&self) -> BookingSelection {
        self.lock().selection.clone()
    }

    pub fn add_service(&self, service: Service) {
        self.mutate(|s| s.services.push(service));
    }

    /// Removes one matching entry. Returns whether anything was removed.
    pub fn remove_service(&self, service_id: i64) -> bool {
        self.mutate(|s| match s.services.iter().position(|x| x.id == service_id) {
            Some(idx) => {
                s.services.remove(idx);
                true
            }
            None => false,
        })
    }

    /// Drops all services; edit targets survive.
    pub fn clear_services(&self) {
        self.mutate(|s| s.services.clear());
    }

    /// Single-service entry: replaces the selection, keeping edit targets.
    pub fn set_service(&self, service: Service) {
        self.mutate(|s| {
            *s = BookingSelection {
                services: vec![service],
                edit_targets: s.edit_targets.take(),
                ..BookingSelection::default()
            };
        });
    }

    /// Changing professional invalidates any chosen slot.
    pub fn set_professional(&self, professional: Option<Professional>) {
        self.mutate(|s| {
            s.professional = professional;
            s.date = None;
            s.time = None;
        });
    }

    pub fn set_date_time(&self, date: NaiveDate, time: String) {
        self.mutate(|s| {
            s.date = Some(date);
            s.time = Some(time);
        });
    }

    /// Slot pick in one write: date, time and (for "any") the attributed professional.
    pub fn pick_slot(&self, date: NaiveDate, time: String, assigned: Option<Professional>) {
        self.mutate(|s| {
            if s.professional.is_none() {
                s.professional = assigned;
            }
            s.date = Some(date);
            s.time = Some(time);
        });
    }

    pub fn reset(&self) {
        self.mutate(|s| *s = BookingSelection::default());
    }

    /// Load one appointment as a single-edit session, or clear the edit
    /// target when `None`. On lookup failure nothing changes.
    pub async fn set_appointment_to_edit(
        &self,
        backend: &dyn Backend,
        appointment: Option<Appointment>,
    ) -> Result<EditOutcome, BookingError> {
        let Some(appointment) = appointment else {
            self.mutate(|s| s.edit_targets = None);
            return Ok(EditOutcome::Applied);
        };

        let ticket = self.begin();
        let (service, professional) = tokio::join!(
            backend.service(appointment.service_id),
            async {
                match appointment.professional_id.as_deref() {
                    Some(id) => backend.professional(id).await.map(Some),
                    None => Ok(None),
                }
            }
        );
        let (service, professional) = match (service, professional) {
            (Ok(s), Ok(p)) => (s, p),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(
                    "edit setup for appointment {} failed: {:#}",
                    appointment.id,
                    e
                );
                return Err(BookingError::Lookup(format!("{e:#}")));
            }
        };

        let local = self.clock.localize(&appointment.start);
        let outcome = self.commit(
            ticket,
            BookingSelection {
                services: vec![service],
                professional,
                date: Some(local.date()),
                time: Some(format_hhmm(local.time())),
                edit_targets: Some(vec![appointment]),
            },
        );
        if outcome == EditOutcome::Superseded {
            tracing::info!("edit setup superseded by a newer change");
        }
        Ok(outcome)
    }

    /// Load a whole booking group for editing. `services[i]` belongs to
    /// `appointments[i]`; the professional comes from the first appointment.
    pub async fn setup_group_edit(
        &self,
        backend: &dyn Backend,
        appointments: Vec<Appointment>,
        services: Vec<Service>,
    ) -> Result<EditOutcome, BookingError> {
        if appointments.is_empty() || appointments.len() != services.len() {
            return Err(BookingError::GroupMismatch {
                appointments: appointments.len(),
                services: services.len(),
            });
        }

        let ticket = self.begin();
        let professional = match appointments[0].professional_id.as_deref() {
            Some(id) => match backend.professional(id).await {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::error!("group edit professional lookup failed: {:#}", e);
                    return Err(BookingError::Lookup(format!("{e:#}")));
                }
            },
            None => None,
        };

        let local = self.clock.localize(&appointments[0].start);
        Ok(self.commit(
            ticket,
            BookingSelection {
                services,
                professional,
                date: Some(local.date()),
                time: Some(format_hhmm(local.time())),
                edit_targets: Some(appointments),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{self, FakeBackend};
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn clock() -> BusinessClock {
        BusinessClock::from_offset_minutes(60).unwrap()
    }

    fn backend() -> FakeBackend {
        let backend = FakeBackend::new();
        {
            let mut s = backend.state();
            s.services = vec![
                fake::service(1, "Manicura", 30, 20.0),
                fake::service(2, "Pedicura", 45, 30.0),
            ];
            s.professionals = vec![
                fake::professional("P1", "Lucía"),
                fake::professional("P2", "Marta"),
            ];
        }
        backend
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_add_remove_keeps_call_order() {
        let store = BookingStore::new(clock());
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        store.add_service(fake::service(2, "Pedicura", 45, 30.0));
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        assert!(store.remove_service(1));
        let ids: Vec<i64> = store.snapshot().services.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let store = BookingStore::new(clock());
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        let before = store.snapshot();
        assert!(!store.remove_service(99));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_set_professional_clears_slot() {
        let store = BookingStore::new(clock());
        store.set_date_time(day(2026, 3, 2), "10:00".into());
        store.set_professional(Some(fake::professional("P1", "Lucía")));
        let sel = store.snapshot();
        assert_eq!(sel.date, None);
        assert_eq!(sel.time, None);
        assert_eq!(sel.professional.unwrap().id, "P1");

        // Already empty stays empty.
        store.set_professional(None);
        let sel = store.snapshot();
        assert_eq!((sel.date, sel.time, sel.professional), (None, None, None));
    }

    #[test]
    fn test_set_date_time_keeps_professional() {
        let store = BookingStore::new(clock());
        store.set_professional(Some(fake::professional("P2", "Marta")));
        store.set_date_time(day(2026, 3, 2), "11:00".into());
        let sel = store.snapshot();
        assert_eq!(sel.professional.unwrap().id, "P2");
        assert_eq!(sel.time.as_deref(), Some("11:00"));
    }

    #[test]
    fn test_pick_slot_assigns_only_when_any() {
        let store = BookingStore::new(clock());
        store.pick_slot(
            day(2026, 3, 2),
            "11:00".into(),
            Some(fake::professional("P1", "Lucía")),
        );
        assert_eq!(store.snapshot().professional.unwrap().id, "P1");

        store.set_professional(Some(fake::professional("P2", "Marta")));
        store.pick_slot(
            day(2026, 3, 2),
            "12:00".into(),
            Some(fake::professional("P1", "Lucía")),
        );
        assert_eq!(store.snapshot().professional.unwrap().id, "P2");
    }

    #[test]
    fn test_clear_services_preserves_edit_targets() {
        let store = BookingStore::new(clock());
        store.mutate(|s| {
            s.edit_targets = Some(vec![fake::appointment(
                "a1",
                1,
                "2026-03-02T09:00:00+01:00",
                "2026-03-02T09:30:00+01:00",
            )])
        });
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        store.clear_services();
        let sel = store.snapshot();
        assert!(sel.services.is_empty());
        assert!(sel.is_edit());
    }

    #[test]
    fn test_set_service_replaces_with_singleton() {
        let store = BookingStore::new(clock());
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        store.add_service(fake::service(2, "Pedicura", 45, 30.0));
        store.set_professional(Some(fake::professional("P1", "Lucía")));
        store.set_service(fake::service(2, "Pedicura", 45, 30.0));
        let sel = store.snapshot();
        assert_eq!(sel.services.len(), 1);
        assert_eq!(sel.services[0].id, 2);
        assert_eq!(sel.professional, None);
    }

    #[test]
    fn test_totals() {
        let store = BookingStore::new(clock());
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        store.add_service(fake::service(2, "Pedicura", 45, 30.0));
        let sel = store.snapshot();
        assert_eq!(sel.total_duration(), 75);
        assert_eq!(sel.total_price(), 50.0);
    }

    #[tokio::test]
    async fn test_edit_populates_single_session() {
        let backend = backend();
        let store = BookingStore::new(clock());
        let appt = fake::appointment(
            "a1",
            2,
            "2026-03-02T09:45:00+01:00",
            "2026-03-02T10:30:00+01:00",
        );
        let outcome = store
            .set_appointment_to_edit(&backend, Some(appt.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, EditOutcome::Applied);
        let sel = store.snapshot();
        assert_eq!(sel.services.len(), 1);
        assert_eq!(sel.services[0].id, 2);
        assert_eq!(sel.professional.unwrap().id, "P1");
        assert_eq!(sel.date, Some(day(2026, 3, 2)));
        assert_eq!(sel.time.as_deref(), Some("09:45"));
        assert_eq!(sel.edit_targets, Some(vec![appt]));
    }

    #[tokio::test]
    async fn test_edit_lookup_failure_leaves_state() {
        let backend = backend();
        backend.state().fail.insert("professional");
        let store = BookingStore::new(clock());
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        let before = store.snapshot();
        let appt = fake::appointment(
            "a1",
            2,
            "2026-03-02T09:45:00+01:00",
            "2026-03-02T10:30:00+01:00",
        );
        let err = store
            .set_appointment_to_edit(&backend, Some(appt))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Lookup(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_edit_none_clears_only_targets() {
        let backend = backend();
        let store = BookingStore::new(clock());
        let appt = fake::appointment(
            "a1",
            1,
            "2026-03-02T09:00:00+01:00",
            "2026-03-02T09:30:00+01:00",
        );
        store
            .set_appointment_to_edit(&backend, Some(appt))
            .await
            .unwrap();
        store.set_appointment_to_edit(&backend, None).await.unwrap();
        let sel = store.snapshot();
        assert_eq!(sel.edit_targets, None);
        assert_eq!(sel.services.len(), 1);
        assert_eq!(sel.time.as_deref(), Some("09:00"));
    }

    #[tokio::test]
    async fn test_stale_edit_does_not_clobber_reset() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend::with_gate(gate.clone()));
        {
            let mut s = backend.state();
            s.services = vec![fake::service(1, "Manicura", 30, 20.0)];
            s.professionals = vec![fake::professional("P1", "Lucía")];
        }
        let store = Arc::new(BookingStore::new(clock()));
        let appt = fake::appointment(
            "a1",
            1,
            "2026-03-02T09:00:00+01:00",
            "2026-03-02T09:30:00+01:00",
        );

        let task = {
            let store = store.clone();
            let backend = backend.clone();
            tokio::spawn(async move {
                store
                    .set_appointment_to_edit(backend.as_ref(), Some(appt))
                    .await
            })
        };
        tokio::task::yield_now().await;

        store.reset();
        gate.notify_one();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, EditOutcome::Superseded);
        assert_eq!(store.snapshot(), BookingSelection::default());
    }

    #[tokio::test]
    async fn test_group_edit_populates_from_first() {
        let backend = backend();
        let store = BookingStore::new(clock());
        let group = uuid::Uuid::new_v4();
        let mut a = fake::appointment(
            "a1",
            1,
            "2026-03-02T09:00:00+01:00",
            "2026-03-02T09:30:00+01:00",
        );
        let mut b = fake::appointment(
            "a2",
            2,
            "2026-03-02T09:30:00+01:00",
            "2026-03-02T10:15:00+01:00",
        );
        a.booking_group_id = Some(group);
        b.booking_group_id = Some(group);
        let services = vec![
            fake::service(1, "Manicura", 30, 20.0),
            fake::service(2, "Pedicura", 45, 30.0),
        ];
        store
            .setup_group_edit(&backend, vec![a, b], services)
            .await
            .unwrap();
        let sel = store.snapshot();
        assert!(sel.is_group_edit());
        assert_eq!(sel.services.len(), 2);
        assert_eq!(sel.time.as_deref(), Some("09:00"));
        assert_eq!(sel.professional.unwrap().id, "P1");
    }

    fn group_pair() -> (Vec<Appointment>, Vec<Service>) {
        let group = uuid::Uuid::new_v4();
        let mut a = fake::appointment(
            "a1",
            1,
            "2026-03-02T09:00:00+01:00",
            "2026-03-02T09:30:00+01:00",
        );
        let mut b = fake::appointment(
            "a2",
            2,
            "2026-03-02T09:30:00+01:00",
            "2026-03-02T10:15:00+01:00",
        );
        a.booking_group_id = Some(group);
        b.booking_group_id = Some(group);
        (
            vec![a, b],
            vec![
                fake::service(1, "Manicura", 30, 20.0),
                fake::service(2, "Pedicura", 45, 30.0),
            ],
        )
    }

    #[tokio::test]
    async fn test_group_edit_lookup_failure_leaves_state() {
        let backend = backend();
        backend.state().fail.insert("professional");
        let store = BookingStore::new(clock());
        store.add_service(fake::service(1, "Manicura", 30, 20.0));
        store.set_professional(Some(fake::professional("P2", "Marta")));
        let before = store.snapshot();

        let (appointments, services) = group_pair();
        let err = store
            .setup_group_edit(&backend, appointments, services)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Lookup(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_stale_group_edit_does_not_clobber_reset() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend::with_professional_gate(gate.clone()));
        backend.state().professionals = vec![fake::professional("P1", "Lucía")];
        let store = Arc::new(BookingStore::new(clock()));
        store.add_service(fake::service(1, "Manicura", 30, 20.0));

        let (appointments, services) = group_pair();
        let task = {
            let store = store.clone();
            let backend = backend.clone();
            tokio::spawn(async move {
                store
                    .setup_group_edit(backend.as_ref(), appointments, services)
                    .await
            })
        };
        tokio::task::yield_now().await;

        store.reset();
        gate.notify_one();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, EditOutcome::Superseded);
        assert_eq!(store.snapshot(), BookingSelection::default());
    }

    #[tokio::test]
    async fn test_group_edit_rejects_length_mismatch() {
        let backend = backend();
        let store = BookingStore::new(clock());
        let a = fake::appointment(
            "a1",
            1,
            "2026-03-02T09:00:00+01:00",
            "2026-03-02T09:30:00+01:00",
        );
        let err = store
            .setup_group_edit(&backend, vec![a], vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::GroupMismatch {
                appointments: 1,
                services: 0
            }
        ));
        assert_eq!(store.snapshot(), BookingSelection::default());
    }
}
