use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{account, appointments, catalog, health, promotions, vouchers, wizard};
use crate::rate_limit::{rate_limit, RateLimiter, Tier};
use crate::AppState;

/// All API routes, grouped by rate-limit tier.
pub fn router(state: Arc<AppState>, limiter: &RateLimiter) -> Router {
    let tier = |t: Tier| from_fn_with_state((limiter.clone(), t), rate_limit);

    // 1. No limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(health::health));

    // 2. Public: catalogue and calendar reads
    let public_routes = Router::new()
        .route("/api/services", get(catalog::list_services))
        .route("/api/categories", get(catalog::list_categories))
        .route("/api/professionals", get(catalog::list_professionals))
        .route("/api/calendar/week", get(catalog::week))
        .route("/api/calendar/time-bands", get(catalog::time_bands))
        .route("/api/promotions", get(promotions::list))
        .route("/api/promotions/{id}/duo-slots", get(promotions::duo_slots))
        .layer(tier(Tier::Public));

    // 3. Wizard: selection, availability and navigation
    let wizard_routes = Router::new()
        .route("/api/wizard", post(wizard::open))
        .route("/api/wizard/{id}", get(wizard::view).delete(wizard::close))
        .route("/api/wizard/{id}/services", post(wizard::add_service))
        .route(
            "/api/wizard/{id}/services/{service_id}",
            delete(wizard::remove_service),
        )
        .route("/api/wizard/{id}/prompt", post(wizard::answer_prompt))
        .route("/api/wizard/{id}/edit-scope", post(wizard::edit_scope))
        .route("/api/wizard/{id}/professional", post(wizard::choose_professional))
        .route("/api/wizard/{id}/slots/day", get(wizard::day_slots))
        .route("/api/wizard/{id}/slots/range", get(wizard::range_slots))
        .route("/api/wizard/{id}/slot", post(wizard::select_slot))
        .route("/api/wizard/{id}/step", post(wizard::jump))
        .route("/api/wizard/{id}/change-time", post(wizard::change_time))
        .route("/api/wizard/{id}/abandon", post(wizard::abandon))
        .layer(tier(Tier::Wizard));

    // 4. Auth: identity and account reads
    let auth_routes = Router::new()
        .route("/api/auth/login", post(account::login))
        .route("/api/auth/register", post(account::register))
        .route("/api/auth/logout", post(account::logout))
        .route("/api/appointments/my", get(appointments::my_appointments))
        .route("/api/appointments/{id}/edit", post(appointments::edit))
        .route("/api/vouchers", get(vouchers::list))
        .route("/api/vouchers/{id}/book", post(vouchers::book))
        .layer(tier(Tier::Auth));

    // 5. Booking writes: strictest limit
    let booking_routes = Router::new()
        .route("/api/wizard/{id}/confirm", post(wizard::confirm))
        .route("/api/appointments/{id}/cancel", post(appointments::cancel))
        .route("/api/promotions/{id}/duo-book", post(promotions::duo_book))
        .layer(tier(Tier::Booking));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(wizard_routes)
        .merge(auth_routes)
        .merge(booking_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
