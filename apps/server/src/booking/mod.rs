//! The booking orchestrator: selection store, step machine, availability
//! reconciliation and confirmation, plus the catalogue and account-side
//! features that seed or follow a booking.

pub mod availability;
pub mod catalog;
pub mod confirm;
pub mod duo;
pub mod profile;
pub mod steps;
pub mod store;
pub mod vouchers;
