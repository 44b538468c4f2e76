//! HTTP surface: `/v1/contacts` plus a database health probe.

mod contacts;
mod error;
mod health;
mod middleware;
mod rate_limit;
mod state;

pub use contacts::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAY_HEADER};
pub use error::{ApiError, codes};
pub use middleware::CORRELATION_ID_HEADER;
pub use rate_limit::{RateDecision, RateLimiter};
pub use state::AppState;

use axum::{Router, middleware as axum_middleware, routing::get};

use middleware::{log_responses, set_request_context};

pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/v1/contacts",
            get(contacts::list_contacts).post(contacts::create_contact),
        )
        .route(
            "/v1/contacts/{id}",
            get(contacts::get_contact)
                .put(contacts::update_contact)
                .delete(contacts::delete_contact),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .merge(v1)
        .route("/health", get(health::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
