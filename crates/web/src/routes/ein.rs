//! EIN application intake route.

use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::admission::{self, EndpointClass, sanitize, validation};
use crate::error::Result;
use crate::state::AppState;

/// Accept an EIN application and acknowledge it.
///
/// POST /api/ein
///
/// Intake stub: the application is validated and acknowledged with an
/// id and a processing estimate, but nothing is persisted and no
/// government system is called. Fulfillment happens out of band from
/// the payment confirmation.
#[instrument(skip(state, headers, body))]
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    admission::check(&state, &headers, EndpointClass::General).await?;

    let payload: Value = serde_json::from_str(&body)
        .map_err(|_| validation::ValidationError::single("body", "must be valid JSON"))?;
    let mut application = validation::ein_application(&payload)?;
    application.business_name = sanitize::sanitize_string(&application.business_name);
    application.entity_type = sanitize::sanitize_string(&application.entity_type);
    application.business_address = sanitize::sanitize_string(&application.business_address);
    application.business_city = sanitize::sanitize_string(&application.business_city);
    application.contact_phone = sanitize::sanitize_phone(&application.contact_phone);

    let application_id = acknowledgment_id();

    info!(
        application_id = %application_id,
        entity_type = %application.entity_type,
        tier = application.service_tier.as_str(),
        "EIN application acknowledged"
    );

    Ok(Json(json!({
        "success": true,
        "applicationId": application_id,
        "estimatedProcessingTime": application.service_tier.processing_estimate(),
    })))
}

/// A fresh acknowledgment id, unique enough to quote in support email.
fn acknowledgment_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(4).collect();
    format!("EIN-{}-{}", Utc::now().timestamp_millis(), suffix)
}
