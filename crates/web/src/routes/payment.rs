//! Payment intent creation route.

use axum::{Json, extract::State, http::HeaderMap};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::admission::{self, EndpointClass, sanitize, validation};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Create a Stripe payment intent for an EIN filing checkout.
///
/// POST /api/create-payment-intent
///
/// Admission runs before the body is touched, so over-quota callers are
/// rejected without parsing. Requires the Stripe credential.
#[instrument(skip(state, headers, body))]
pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    admission::check(&state, &headers, EndpointClass::Payment).await?;

    let Some(stripe) = state.stripe() else {
        return Err(ApiError::ServiceUnavailable);
    };

    let payload: Value = serde_json::from_str(&body)
        .map_err(|_| validation::ValidationError::single("body", "must be valid JSON"))?;
    let mut request = validation::payment_intent(&payload)?;
    request.entity_type = sanitize::sanitize_string(&request.entity_type);

    let intent = stripe.create_payment_intent(&request).await?;

    info!(
        application_id = %request.application_id,
        tier = request.tier.as_str(),
        "Payment intent created"
    );

    Ok(Json(json!({ "clientSecret": intent.client_secret })))
}
