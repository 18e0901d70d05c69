//! HTTP route handlers for the EIN Direct backend.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                    - Liveness probe
//! GET  /ready                     - Readiness probe
//!
//! # API (every POST runs admission first: identity, rate limit,
//! # validation, sanitization)
//! POST /api/create-payment-intent - Create a Stripe payment intent
//! POST /api/webhooks/stripe       - Stripe webhook receiver
//! POST /api/chat                  - Sales assistant (streamed reply)
//! POST /api/ein                   - EIN application acknowledgment stub
//! POST /api/priority-contact      - Priority support request
//! POST /api/test-email            - Operator email delivery check
//! ```

pub mod chat;
pub mod contact;
pub mod ein;
pub mod health;
pub mod payment;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the API routes router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/create-payment-intent", post(payment::create_intent))
        .route("/webhooks/stripe", post(webhooks::stripe))
        .route("/chat", post(chat::stream))
        .route("/ein", post(ein::submit))
        .route("/priority-contact", post(contact::submit))
        .route("/test-email", post(contact::test_email))
}

/// Create all routes for the backend.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::readiness))
        .nest("/api", api_routes())
}
