//! Wizard sessions: one booking orchestrator per browser session.
//!
//! A session owns its [`BookingStore`], step state and [`Reconciler`]. Step
//! validation and the store write it guards happen under the step lock; the
//! async follow-ups a transition asks for (group-edit loading, persistence)
//! run afterwards without holding any lock.

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::backend::Backend;
use crate::booking::availability::{
    is_past, AvailabilityQuery, DayGrid, Fetched, RangeResult, Reconciler, TimeBand,
};
use crate::booking::catalog::{qualified_for, Catalog};
use crate::booking::confirm::{self, Receipt};
use crate::booking::steps::{
    self, Effect, EditGroup, EditScopeChoice, EntryFlags, Prompt, PromptAnswer, Step, Transition,
    WizardEvent, WizardState,
};
use crate::booking::store::{BookingSelection, BookingStore, EditOutcome};
use crate::clock::BusinessClock;
use crate::error::BookingError;
use crate::models::{Appointment, Service};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What every session needs from the application.
#[derive(Clone)]
pub struct WizardDeps {
    pub backend: Arc<dyn Backend>,
    pub catalog: Arc<Catalog>,
    pub clock: BusinessClock,
}

// ── View ──

#[derive(Debug, Clone, Serialize)]
pub struct StepInfo {
    pub number: u8,
    pub label: &'static str,
    pub current: bool,
    /// Reachable by jumping back.
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WizardView {
    pub id: Uuid,
    pub step: Step,
    pub steps: Vec<StepInfo>,
    pub prompt: Option<Prompt>,
    pub selection: BookingSelection,
    pub total_duration: i64,
    pub total_price: f64,
    pub editing: bool,
    pub skip_professional: bool,
    /// The wizard was left (edit cancelled or booking finished in edit mode).
    pub closed: bool,
}

/// Slots from the latest fresh availability result and the query that produced them.
#[derive(Default)]
struct Offered {
    query: Option<AvailabilityQuery>,
    slots: HashMap<(NaiveDate, String), String>,
}

// ── Session ──

pub struct WizardSession {
    id: Uuid,
    deps: WizardDeps,
    flags: EntryFlags,
    /// Client an edit session was opened for.
    owner: Option<String>,
    store: BookingStore,
    reconciler: Reconciler,
    state: Mutex<WizardState>,
    offered: Mutex<Offered>,
    persisting: AtomicBool,
    closed: AtomicBool,
    touched: Mutex<Instant>,
}

impl WizardSession {
    fn blank(deps: WizardDeps, flags: EntryFlags, owner: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store: BookingStore::new(deps.clock),
            reconciler: Reconciler::new(deps.backend.clone(), deps.clock),
            deps,
            flags,
            owner,
            state: Mutex::new(WizardState {
                step: Step::Service,
                prompt: None,
            }),
            offered: Mutex::new(Offered::default()),
            persisting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            touched: Mutex::new(Instant::now()),
        }
    }

    /// A new booking, optionally seeded with services (promotion or voucher entry).
    pub fn open(deps: WizardDeps, services: Vec<Service>, flags: EntryFlags) -> Self {
        let session = Self::blank(deps, flags, None);
        match <[Service; 1]>::try_from(services) {
            Ok([single]) => session.store.set_service(single),
            Err(services) => {
                for service in services {
                    session.store.add_service(service);
                }
            }
        }
        *lock(&session.state) = steps::initial_state(&session.store.snapshot(), None, flags);
        session
    }

    /// An edit of `appointment`, owned by `client_id`. `group` is its booking
    /// group when it has siblings; the wizard then starts on the edit-scope prompt.
    pub async fn open_edit(
        deps: WizardDeps,
        client_id: String,
        appointment: Appointment,
        group: Option<EditGroup>,
    ) -> Result<Self, BookingError> {
        let session = Self::blank(deps, EntryFlags::default(), Some(client_id));
        session
            .store
            .set_appointment_to_edit(session.deps.backend.as_ref(), Some(appointment))
            .await?;
        *lock(&session.state) =
            steps::initial_state(&session.store.snapshot(), group, session.flags);
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&self) {
        *lock(&self.touched) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        lock(&self.touched).elapsed()
    }

    pub fn view(&self) -> WizardView {
        let state = lock(&self.state).clone();
        let selection = self.store.snapshot();
        WizardView {
            id: self.id,
            step: state.step,
            steps: Step::ALL
                .into_iter()
                .map(|s| StepInfo {
                    number: s.number(),
                    label: s.label(),
                    current: s == state.step,
                    completed: s < state.step,
                })
                .collect(),
            prompt: state.prompt,
            total_duration: selection.total_duration(),
            total_price: selection.total_price(),
            editing: selection.is_edit(),
            skip_professional: self.flags.skip_professional,
            closed: self.closed.load(Ordering::SeqCst),
            selection,
        }
    }

    /// Validate `event` against the current step, run the guarded store
    /// write and move to the next state in one critical section.
    fn advance_with(
        &self,
        event: WizardEvent,
        write: impl FnOnce(&BookingStore),
    ) -> Result<Transition, BookingError> {
        self.touch();
        if self.closed.load(Ordering::SeqCst) {
            return Err(BookingError::InvalidInput("this booking session is closed".into()));
        }
        let mut state = lock(&self.state);
        let selection = self.store.snapshot();
        let transition = steps::transition(&state, &selection, self.flags, event.clone())
            .ok_or_else(|| {
                BookingError::InvalidInput(format!(
                    "{event:?} is not possible at step {}",
                    state.step.number()
                ))
            })?;
        write(&self.store);
        *state = transition.state.clone();
        Ok(transition)
    }

    fn advance(&self, event: WizardEvent) -> Result<Transition, BookingError> {
        self.advance_with(event, |_| {})
    }

    /// Store-side effects that need no I/O.
    fn settle(&self, effect: Option<Effect>) {
        match effect {
            Some(Effect::ClearServices) => {
                self.store.clear_services();
                self.forget_offers();
            }
            Some(Effect::StartOver) => {
                self.store.reset();
                self.forget_offers();
            }
            Some(Effect::Exit) => {
                self.store.reset();
                self.forget_offers();
                self.closed.store(true, Ordering::SeqCst);
            }
            Some(Effect::SetupGroupEdit(_)) | Some(Effect::Persist) | None => {}
        }
    }

    /// The availability inputs changed: drop what was offered and anything in flight.
    fn forget_offers(&self) {
        self.reconciler.cancel();
        *lock(&self.offered) = Offered::default();
    }

    fn expect_step(&self, step: Step) -> Result<(), BookingError> {
        let state = lock(&self.state);
        if state.step != step || state.prompt.is_some() {
            return Err(BookingError::InvalidInput(format!(
                "available times are shown at step {}",
                step.number()
            )));
        }
        Ok(())
    }

    // ── Service step ──

    pub async fn add_service(&self, service_id: i64) -> Result<WizardView, BookingError> {
        let service = self.deps.catalog.service(service_id).await?;
        self.advance_with(WizardEvent::ServiceAdded, |store| store.add_service(service))?;
        self.forget_offers();
        Ok(self.view())
    }

    pub fn remove_service(&self, service_id: i64) -> Result<WizardView, BookingError> {
        self.advance_with(WizardEvent::ServiceRemoved, |store| {
            store.remove_service(service_id);
        })?;
        self.forget_offers();
        Ok(self.view())
    }

    pub fn answer_prompt(&self, answer: PromptAnswer) -> Result<WizardView, BookingError> {
        let t = self.advance(WizardEvent::AddServicePrompt(answer))?;
        self.settle(t.effect);
        Ok(self.view())
    }

    // ── Edit scope ──

    pub async fn choose_edit_scope(
        &self,
        choice: EditScopeChoice,
    ) -> Result<WizardView, BookingError> {
        let t = self.advance(WizardEvent::EditScope(choice))?;
        let group = match t.effect {
            Some(Effect::SetupGroupEdit(group)) => group,
            other => {
                self.settle(other);
                return Ok(self.view());
            }
        };
        self.forget_offers();
        let outcome = self
            .store
            .setup_group_edit(
                self.deps.backend.as_ref(),
                group.appointments,
                group.services,
            )
            .await?;
        if outcome == EditOutcome::Applied {
            self.advance(WizardEvent::GroupEditLoaded)?;
        }
        Ok(self.view())
    }

    // ── Professional step ──

    pub async fn choose_professional(
        &self,
        professional_id: Option<String>,
    ) -> Result<WizardView, BookingError> {
        let professional = match professional_id {
            Some(id) => {
                let professional = self.deps.catalog.professional(&id).await?;
                let selection = self.store.snapshot();
                if qualified_for(std::slice::from_ref(&professional), &selection.services).is_empty() {
                    return Err(BookingError::InvalidInput(format!(
                        "{} does not perform every selected service",
                        professional.full_name
                    )));
                }
                Some(professional)
            }
            None => None,
        };
        self.advance_with(WizardEvent::ProfessionalChosen, |store| {
            store.set_professional(professional)
        })?;
        self.forget_offers();
        Ok(self.view())
    }

    // ── Date/time step ──

    fn query(&self) -> Result<AvailabilityQuery, BookingError> {
        AvailabilityQuery::from_selection(&self.store.snapshot())
            .ok_or(BookingError::MissingData("services"))
    }

    pub async fn day_slots(&self, date: NaiveDate) -> Result<Fetched<DayGrid>, BookingError> {
        self.touch();
        self.expect_step(Step::DateTime)?;
        if date < self.deps.clock.today() {
            return Err(BookingError::InvalidInput("date is in the past".into()));
        }
        let query = self.query()?;
        let fetched = self.reconciler.day_grid(&query, date).await;
        if let Fetched::Fresh(grid) = &fetched {
            let slots = grid
                .slots
                .iter()
                .filter(|s| s.selectable)
                .filter_map(|s| {
                    let pid = s.professional_id.clone()?;
                    Some(((date, s.time.clone()), pid))
                })
                .collect();
            *lock(&self.offered) = Offered {
                query: Some(query),
                slots,
            };
        }
        Ok(fetched)
    }

    pub async fn range_slots(&self, band: TimeBand) -> Result<Fetched<RangeResult>, BookingError> {
        self.touch();
        self.expect_step(Step::DateTime)?;
        let query = self.query()?;
        let fetched = self.reconciler.range_by_hour(&query, band).await;
        if let Fetched::Fresh(result) = &fetched {
            let slots = result
                .days
                .iter()
                .flat_map(|(date, slots)| {
                    slots
                        .iter()
                        .map(move |s| ((*date, s.time.clone()), s.professional_id.clone()))
                })
                .collect();
            *lock(&self.offered) = Offered {
                query: Some(query),
                slots,
            };
        }
        Ok(fetched)
    }

    /// Pick one of the slots last offered for the current services,
    /// professional and edit targets. With "any professional" chosen, the
    /// slot's attributed professional becomes the selection's.
    pub async fn select_slot(&self, date: NaiveDate, time: String) -> Result<WizardView, BookingError> {
        let unavailable = || BookingError::InvalidInput(format!("{date} {time} is not available"));
        let current = AvailabilityQuery::from_selection(&self.store.snapshot());
        let attributed = {
            let offered = lock(&self.offered);
            if offered.query.is_none() || offered.query != current {
                return Err(unavailable());
            }
            offered
                .slots
                .get(&(date, time.clone()))
                .cloned()
                .ok_or_else(unavailable)?
        };
        if is_past(date, &time, self.deps.clock.now().naive_local()) {
            return Err(BookingError::InvalidInput(format!("{date} {time} has already started")));
        }
        let assigned = if self.store.snapshot().professional.is_none() {
            Some(self.deps.catalog.professional(&attributed).await?)
        } else {
            None
        };
        self.advance_with(WizardEvent::SlotChosen, |store| match assigned {
            Some(professional) => store.pick_slot(date, time, Some(professional)),
            None => store.set_date_time(date, time),
        })?;
        Ok(self.view())
    }

    // ── Navigation ──

    pub fn jump(&self, step: Step) -> Result<WizardView, BookingError> {
        self.advance(WizardEvent::JumpTo(step))?;
        Ok(self.view())
    }

    pub fn change_time(&self) -> Result<WizardView, BookingError> {
        self.advance(WizardEvent::ChangeTime)?;
        Ok(self.view())
    }

    pub fn abandon(&self) -> Result<WizardView, BookingError> {
        let t = self.advance(WizardEvent::Abandon)?;
        self.settle(t.effect);
        Ok(self.view())
    }

    /// Unmount: nothing in flight may land afterwards.
    pub fn cancel(&self) {
        self.reconciler.cancel();
    }

    // ── Confirm ──

    /// Persist the booking for the logged-in `client_id`. Anonymous callers
    /// get `Unauthorized` and the selection is left alone.
    pub async fn confirm(&self, client_id: Option<&str>) -> Result<Receipt, BookingError> {
        let client_id = client_id.ok_or(BookingError::Unauthorized)?;
        if self.owner.as_deref().is_some_and(|owner| owner != client_id) {
            return Err(BookingError::Unauthorized);
        }
        if self.persisting.swap(true, Ordering::SeqCst) {
            return Err(BookingError::InvalidInput("confirmation already in progress".into()));
        }
        let result = self.persist(client_id).await;
        self.persisting.store(false, Ordering::SeqCst);
        result
    }

    async fn persist(&self, client_id: &str) -> Result<Receipt, BookingError> {
        self.advance(WizardEvent::Confirm)?;
        let selection = self.store.snapshot();
        let plan = confirm::plan(&selection, client_id, &self.deps.clock, Uuid::new_v4)?;
        let receipt = confirm::execute(self.deps.backend.as_ref(), plan, client_id).await?;
        let t = self.advance(WizardEvent::Booked)?;
        self.settle(t.effect);
        Ok(receipt)
    }
}

// ── Registry ──

pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<WizardSession>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, session: WizardSession) -> Arc<WizardSession> {
        let session = Arc::new(session);
        self.sessions.insert(session.id(), session.clone());
        session
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<WizardSession>, BookingError> {
        self.sessions
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| BookingError::NotFound(format!("booking session {id}")))
    }

    /// Drop a session, cancelling whatever it has in flight.
    pub fn remove(&self, id: Uuid) -> bool {
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Expire sessions idle for longer than the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            let keep = session.idle_for() < self.ttl;
            if !keep {
                session.cancel();
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
