//! Confirmation: turn a finished selection into appointment writes.
//!
//! Services are laid out back to back from the chosen start. New multi-service
//! bookings share a fresh group id; a single edit detaches from its group;
//! a group edit rewrites every member in place. Multi-write operations run
//! concurrently and compensate on partial failure.

use chrono::{DateTime, Duration, FixedOffset};
use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::backend::Backend;
use crate::booking::store::BookingSelection;
use crate::clock::{parse_hhmm, BusinessClock};
use crate::error::BookingError;
use crate::models::{Appointment, AppointmentStatus, AppointmentWrite, Service};

pub const BOOKED_MESSAGE: &str = "Tu cita ha sido confirmada correctamente. ¡Te esperamos!";
pub const EDITED_MESSAGE: &str = "Tu cita ha sido modificada correctamente.";

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub service_id: i64,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Sequential layout: each service starts where the previous one ends.
pub fn lay_out(services: &[Service], start: DateTime<FixedOffset>) -> Vec<Interval> {
    let mut cursor = start;
    services
        .iter()
        .map(|s| {
            let end = cursor + Duration::minutes(s.duration);
            let interval = Interval {
                service_id: s.id,
                start: cursor,
                end,
            };
            cursor = end;
            interval
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    Create {
        writes: Vec<AppointmentWrite>,
        group_id: Option<Uuid>,
    },
    UpdateOne {
        original: Appointment,
        write: AppointmentWrite,
    },
    /// `(original, replacement)` per group member, in layout order.
    UpdateGroup {
        updates: Vec<(Appointment, AppointmentWrite)>,
    },
}

/// Build the writes for `selection`. `new_group_id` is only called for a new
/// booking with more than one service.
pub fn plan(
    selection: &BookingSelection,
    client_id: &str,
    clock: &BusinessClock,
    new_group_id: impl FnOnce() -> Uuid,
) -> Result<WritePlan, BookingError> {
    if selection.services.is_empty() {
        return Err(BookingError::MissingData("services"));
    }
    let date = selection.date.ok_or(BookingError::MissingData("date"))?;
    let time = selection
        .time
        .as_deref()
        .ok_or(BookingError::MissingData("time"))?;
    let time = parse_hhmm(time)
        .ok_or_else(|| BookingError::InvalidInput(format!("bad start time {time:?}")))?;

    let start = clock.at(date.and_time(time));
    let intervals = lay_out(&selection.services, start);
    let professional_id = selection.professional.as_ref().map(|p| p.id.clone());
    let write = |iv: &Interval, group: Option<Uuid>| AppointmentWrite {
        client_id: client_id.to_string(),
        service_id: iv.service_id,
        professional_id: professional_id.clone(),
        start_time: iv.start,
        end_time: iv.end,
        status: AppointmentStatus::Confirmed,
        booking_group_id: group,
    };

    let targets = match &selection.edit_targets {
        Some(t) if !t.is_empty() => t,
        _ => {
            let group_id = (intervals.len() > 1).then(new_group_id);
            return Ok(WritePlan::Create {
                writes: intervals.iter().map(|iv| write(iv, group_id)).collect(),
                group_id,
            });
        }
    };

    match (targets.len(), intervals.len()) {
        (1, 1) => Ok(WritePlan::UpdateOne {
            original: targets[0].clone(),
            write: write(&intervals[0], None),
        }),
        (a, s) if a == s => Ok(WritePlan::UpdateGroup {
            updates: targets
                .iter()
                .zip(&intervals)
                .map(|(appt, iv)| (appt.clone(), write(iv, appt.booking_group_id)))
                .collect(),
        }),
        (appointments, services) => Err(BookingError::GroupMismatch {
            appointments,
            services,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub appointment_ids: Vec<String>,
    pub group_id: Option<Uuid>,
    pub edited: bool,
    pub message: &'static str,
}

/// Run `plan` against the backend.
pub async fn execute(
    backend: &dyn Backend,
    plan: WritePlan,
    client_id: &str,
) -> Result<Receipt, BookingError> {
    match plan {
        WritePlan::Create { writes, group_id } => {
            let total = writes.len();
            let results = join_all(writes.iter().map(|w| backend.create_appointment(w))).await;

            let mut created = Vec::with_capacity(total);
            let mut failures = Vec::new();
            for result in results {
                match result {
                    Ok(appt) => created.push(appt.id),
                    Err(e) => failures.push(e),
                }
            }
            if failures.is_empty() {
                tracing::info!(
                    "booked {} appointment(s) for client {} (group {:?})",
                    total,
                    client_id,
                    group_id
                );
                return Ok(Receipt {
                    appointment_ids: created,
                    group_id,
                    edited: false,
                    message: BOOKED_MESSAGE,
                });
            }
            for e in &failures {
                tracing::error!("create appointment failed: {:#}", e);
            }
            if created.is_empty() {
                return Err(BookingError::Persistence(format!("{:#}", failures[0])));
            }
            let compensated = cancel_created(backend, &created).await;
            Err(BookingError::PartialWrite {
                failed: failures.len(),
                total,
                compensated,
            })
        }

        WritePlan::UpdateOne { original, write } => {
            backend
                .update_appointment(&original.id, &write)
                .await
                .map_err(|e| {
                    tracing::error!("update appointment {} failed: {:#}", original.id, e);
                    BookingError::Persistence(format!("{e:#}"))
                })?;
            tracing::info!("appointment {} moved to {}", original.id, write.start_time);
            Ok(Receipt {
                appointment_ids: vec![original.id],
                group_id: None,
                edited: true,
                message: EDITED_MESSAGE,
            })
        }

        WritePlan::UpdateGroup { updates } => {
            let total = updates.len();
            let results = join_all(
                updates
                    .iter()
                    .map(|(orig, w)| backend.update_appointment(&orig.id, w)),
            )
            .await;

            let mut done = Vec::new();
            let mut failed = 0;
            for ((orig, _), result) in updates.iter().zip(results) {
                match result {
                    Ok(()) => done.push(orig),
                    Err(e) => {
                        tracing::error!("group update of appointment {} failed: {:#}", orig.id, e);
                        failed += 1;
                    }
                }
            }
            if failed == 0 {
                let group_id = updates.first().and_then(|(a, _)| a.booking_group_id);
                tracing::info!("group {:?} moved ({} appointments)", group_id, total);
                return Ok(Receipt {
                    appointment_ids: updates.into_iter().map(|(a, _)| a.id).collect(),
                    group_id,
                    edited: true,
                    message: EDITED_MESSAGE,
                });
            }
            if done.is_empty() {
                return Err(BookingError::Persistence(format!(
                    "all {total} group updates failed"
                )));
            }
            let compensated = restore_updated(backend, &done, client_id).await;
            Err(BookingError::PartialWrite {
                failed,
                total,
                compensated,
            })
        }
    }
}

/// Undo creates that went through. Returns how many were undone.
async fn cancel_created(backend: &dyn Backend, ids: &[String]) -> usize {
    let results = join_all(ids.iter().map(|id| backend.cancel_appointment(id))).await;
    ids.iter()
        .zip(results)
        .filter(|(id, r)| match r {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("rollback: cancelling appointment {} failed: {:#}", id, e);
                false
            }
        })
        .count()
}

/// Put updated appointments back. Returns how many were restored.
async fn restore_updated(backend: &dyn Backend, originals: &[&Appointment], client_id: &str) -> usize {
    let writes: Vec<AppointmentWrite> = originals
        .iter()
        .map(|a| AppointmentWrite::restoring(a, client_id))
        .collect();
    let results = join_all(
        originals
            .iter()
            .zip(&writes)
            .map(|(a, w)| backend.update_appointment(&a.id, w)),
    )
    .await;
    originals
        .iter()
        .zip(results)
        .filter(|(a, r)| match r {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("rollback: restoring appointment {} failed: {:#}", a.id, e);
                false
            }
        })
        .count()
}
