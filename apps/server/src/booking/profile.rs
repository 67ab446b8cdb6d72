//! A client's own appointments: listing, cancellation and edit discovery.

use serde::Serialize;

use crate::backend::Backend;
use crate::booking::catalog::Catalog;
use crate::booking::steps::EditGroup;
use crate::clock::BusinessClock;
use crate::error::BookingError;
use crate::models::{Appointment, AppointmentStatus};

pub const CANCELLED_MESSAGE: &str = "Tu cita ha sido anulada correctamente.";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    /// Confirmed from today on, soonest first.
    pub upcoming: Vec<Appointment>,
    /// Confirmed before today or completed, latest first.
    pub past: Vec<Appointment>,
}

pub fn split_history(appointments: Vec<Appointment>, clock: &BusinessClock) -> History {
    let today = clock.today();
    let mut history = History::default();
    for appt in appointments {
        let upcoming = clock.localize(&appt.start).date() >= today;
        match appt.status {
            AppointmentStatus::Confirmed if upcoming => history.upcoming.push(appt),
            AppointmentStatus::Confirmed | AppointmentStatus::Completed => history.past.push(appt),
            AppointmentStatus::Cancelled => {}
        }
    }
    history.upcoming.sort_by_key(|a| a.start);
    history.past.sort_by(|a, b| b.start.cmp(&a.start));
    history
}

pub async fn history(
    backend: &dyn Backend,
    clock: &BusinessClock,
    client_id: &str,
) -> Result<History, BookingError> {
    let appointments = backend.client_appointments(client_id).await.map_err(|e| {
        tracing::error!("appointments for client {} failed: {:#}", client_id, e);
        BookingError::Lookup(format!("{e:#}"))
    })?;
    Ok(split_history(appointments, clock))
}

/// The appointment, if it exists and belongs to `client_id`.
pub async fn owned_appointment(
    backend: &dyn Backend,
    client_id: &str,
    appointment_id: &str,
) -> Result<Appointment, BookingError> {
    let not_found = || BookingError::NotFound(format!("appointment {appointment_id}"));
    let appt = backend.appointment(appointment_id).await.map_err(|e| {
        tracing::warn!("appointment {} lookup failed: {:#}", appointment_id, e);
        not_found()
    })?;
    if appt.client_id.as_deref() != Some(client_id) {
        tracing::warn!(
            "client {} asked for appointment {} owned by someone else",
            client_id,
            appointment_id
        );
        return Err(not_found());
    }
    Ok(appt)
}

pub async fn cancel(
    backend: &dyn Backend,
    client_id: &str,
    appointment_id: &str,
) -> Result<(), BookingError> {
    let appt = owned_appointment(backend, client_id, appointment_id).await?;
    if appt.status != AppointmentStatus::Confirmed {
        return Err(BookingError::InvalidInput(
            "only confirmed appointments can be cancelled".into(),
        ));
    }
    backend.cancel_appointment(&appt.id).await.map_err(|e| {
        tracing::error!("cancelling appointment {} failed: {:#}", appt.id, e);
        BookingError::Persistence(format!("{e:#}"))
    })?;
    tracing::info!("appointment {} cancelled by client {}", appt.id, client_id);
    Ok(())
}

/// The group `appointment` belongs to, when it has siblings. Discovery
/// failures fall back to a single edit.
pub async fn edit_group(catalog: &Catalog, appointment: &Appointment) -> Option<EditGroup> {
    let group_id = appointment.booking_group_id?;
    let appointments = match catalog
        .backend()
        .group_appointments(&group_id.to_string())
        .await
    {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!("group {} lookup failed, editing single: {:#}", group_id, e);
            return None;
        }
    };
    if appointments.len() < 2 {
        return None;
    }
    let ids: Vec<i64> = appointments.iter().map(|a| a.service_id).collect();
    match catalog.services_by_id(&ids).await {
        Ok(services) => Some(EditGroup {
            appointments,
            services,
        }),
        Err(e) => {
            tracing::warn!("services for group {} unavailable, editing single: {}", group_id, e);
            None
        }
    }
}
