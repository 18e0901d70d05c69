//! Stripe webhook receiver.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::services::stripe::{EventKind, StripeEvent};
use crate::state::AppState;

/// Receive a Stripe webhook event.
///
/// POST /api/webhooks/stripe
///
/// Verification reads the raw body, so this route never goes through
/// schema validation. Once a signature verifies, the response is always
/// `200 {"received": true}`: a notification fault after that point must
/// not make Stripe redeliver a payment event we already accepted.
#[instrument(skip(state, headers, body))]
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("Webhook rejected: missing stripe-signature header");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing stripe-signature header" })),
        )
            .into_response();
    };

    let Some(verifier) = state.webhooks() else {
        // Our misconfiguration, not the caller's signature; 500 so the
        // delivery is retried once the secret is set
        error!("Webhook rejected: STRIPE_WEBHOOK_SECRET is not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Webhook processing failed" })),
        )
            .into_response();
    };

    let event = match verifier.verify_and_parse(signature, &body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Webhook rejected: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid signature" })),
            )
                .into_response();
        }
    };

    // Verified from here on; nothing below may change the response
    dispatch(&state, &event);

    (StatusCode::OK, Json(json!({ "received": true }))).into_response()
}

/// Classify a verified event and kick off its side effects.
///
/// Notification fan-out runs on a detached task. Handler failures are
/// logged where they happen and never reach the acknowledgement.
fn dispatch(state: &AppState, event: &StripeEvent) {
    let kind = event.kind();
    match kind {
        EventKind::PaymentSucceeded | EventKind::PaymentFailed => {
            let Some(intent) = event.payment_intent() else {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Payment event carried no parsable intent"
                );
                return;
            };

            info!(
                event_id = %event.id,
                intent_id = %intent.id,
                event_type = %event.event_type,
                "Processing payment event"
            );

            if let Some(notifier) = state.notifier() {
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    notifier.notify_payment(kind, &intent).await;
                });
            } else {
                warn!(
                    event_id = %event.id,
                    "Email delivery not configured, skipping notifications"
                );
            }
        }
        EventKind::Other => {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Acknowledging unhandled event type"
            );
        }
    }
}
