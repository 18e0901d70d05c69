//! Priority support and email diagnostic routes.

use axum::{Json, extract::State, http::HeaderMap};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::admission::{self, EndpointClass, sanitize, validation};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Submit a priority support request.
///
/// POST /api/priority-contact
///
/// Delivers one email to the operator. Unlike payment fan-out, delivery
/// is the whole point of the route, so a transport failure surfaces as
/// an error to the caller.
#[instrument(skip(state, headers, body))]
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    admission::check(&state, &headers, EndpointClass::General).await?;

    let Some(notifier) = state.notifier() else {
        return Err(ApiError::ServiceUnavailable);
    };

    let payload: Value = serde_json::from_str(&body)
        .map_err(|_| validation::ValidationError::single("body", "must be valid JSON"))?;
    let mut contact = validation::priority_contact(&payload)?;
    contact.name = sanitize::sanitize_string(&contact.name);
    contact.subject = contact.subject.as_deref().map(sanitize::sanitize_string);
    contact.message = sanitize::sanitize_string(&contact.message);
    contact.entity_type = sanitize::sanitize_string(&contact.entity_type);
    contact.phone = sanitize::sanitize_phone(&contact.phone);

    notifier.send_priority_contact(&contact).await?;

    info!(entity_type = %contact.entity_type, "Priority contact delivered");

    Ok(Json(json!({ "success": true })))
}

/// Send a canned test email to the operator.
///
/// POST /api/test-email
///
/// Delivery diagnostic: proves the email credential and sender domain
/// work without waiting for a real payment.
#[instrument(skip(state, headers))]
pub async fn test_email(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    admission::check(&state, &headers, EndpointClass::General).await?;

    let Some(notifier) = state.notifier() else {
        return Err(ApiError::ServiceUnavailable);
    };

    notifier.send_test_email().await?;

    Ok(Json(json!({ "success": true })))
}
