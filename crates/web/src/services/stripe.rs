//! Stripe API client and webhook signature verification.
//!
//! The client creates payment intents over the form-encoded v1 API. The
//! verifier implements Stripe's webhook signature scheme and is a separate
//! type so inbound verification can be configured (and tested)
//! independently of outbound API access.

use std::time::Duration;

use chrono::Utc;
use ein_direct_core::Email;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::admission::validation::PaymentIntentRequest;
use crate::config::StripeConfig;

/// Stripe API base URL.
const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum accepted age of a signed webhook, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Errors from the Stripe API client.
#[derive(Debug, Error)]
pub enum StripeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse Stripe response: {0}")]
    Parse(String),
}

/// Errors from webhook signature verification.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("missing or malformed stripe-signature header")]
    MalformedHeader,

    #[error("request timestamp outside tolerance")]
    StaleTimestamp,

    #[error("signature mismatch")]
    Mismatch,

    #[error("verifier failure: {0}")]
    Verifier(String),

    #[error("verified payload is not a valid event: {0}")]
    Payload(String),
}

// =============================================================================
// Payment intents
// =============================================================================

/// Stripe API client for checkout.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
}

/// The slice of a Stripe payment intent the checkout flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    /// Stripe's intent id (pi_...)
    pub id: String,
    /// Client-side confirmation secret handed to Stripe.js
    pub client_secret: String,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key cannot form a valid header or the
    /// HTTP client cannot be constructed.
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.secret_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| StripeError::Parse(format!("Invalid API key: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }

    /// Create a payment intent for one checkout attempt.
    ///
    /// The application id, entity type, and tier ride along as metadata so
    /// the webhook side can tie the charge back to its form session.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or Stripe answers non-2xx.
    #[instrument(
        skip(self, request),
        fields(application_id = %request.application_id, tier = request.tier.as_str())
    )]
    pub async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, StripeError> {
        let mut form: Vec<(&str, String)> = vec![
            ("amount", request.amount.cents().to_string()),
            ("currency", "usd".to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            (
                "description",
                format!("EIN filing service ({})", request.tier.as_str()),
            ),
            ("metadata[applicationId]", request.application_id.to_string()),
            ("metadata[entityType]", request.entity_type.clone()),
            ("metadata[serviceTier]", request.tier.as_str().to_string()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("receipt_email", email.to_string()));
            form.push(("metadata[customerEmail]", email.to_string()));
        }

        let response = self
            .client
            .post(format!("{STRIPE_API_BASE}/payment_intents"))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let intent: PaymentIntent = response
            .json()
            .await
            .map_err(|e| StripeError::Parse(e.to_string()))?;

        debug!(intent_id = %intent.id, "Payment intent created");

        Ok(intent)
    }
}

// =============================================================================
// Webhook verification
// =============================================================================

/// Verifier for inbound Stripe webhook signatures.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl WebhookVerifier {
    /// Create a verifier from the webhook signing secret.
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        Self {
            secret: secret.clone(),
        }
    }

    /// Verify the signature header against the raw body, then parse the
    /// event.
    ///
    /// This implements Stripe's scheme: the header carries `t=<unix>` and
    /// one or more `v1=<hex>` candidates, and the signed payload is
    /// `"{t}.{body}"`. Verification runs before any JSON parsing, so an
    /// unsigned payload never reaches the event deserializer.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed, the timestamp is
    /// outside tolerance, no candidate signature matches, or the verified
    /// body is not a Stripe event.
    #[instrument(skip(self, header, body))]
    pub fn verify_and_parse(
        &self,
        header: &str,
        body: &str,
    ) -> Result<StripeEvent, SignatureError> {
        let (timestamp, candidates) = parse_signature_header(header)?;

        // Reject replayed deliveries (5 minutes, matching Stripe's SDKs)
        let now = Utc::now().timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(SignatureError::StaleTimestamp);
        }

        let signed_payload = format!("{timestamp}.{body}");

        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| SignatureError::Verifier(e.to_string()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Any matching candidate passes, so secret rotation can overlap
        if !candidates
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            return Err(SignatureError::Mismatch);
        }

        debug!("Webhook signature verified");

        serde_json::from_str(body).map_err(|e| SignatureError::Payload(e.to_string()))
    }
}

/// Split a `stripe-signature` header into its timestamp and `v1`
/// candidates. Unknown schemes (e.g. `v0`) are ignored.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }

    match (timestamp, candidates.is_empty()) {
        (Some(timestamp), false) => Ok((timestamp, candidates)),
        _ => Err(SignatureError::MalformedHeader),
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

// =============================================================================
// Webhook events
// =============================================================================

/// Event kinds the webhook dispatcher distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `payment_intent.succeeded`
    PaymentSucceeded,
    /// `payment_intent.payment_failed`
    PaymentFailed,
    /// Anything else: acknowledged and otherwise ignored
    Other,
}

/// A verified Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    /// Stripe's event id (evt_...)
    pub id: String,
    /// Dotted event type string
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: EventData,
}

/// The `data` envelope of a webhook event.
///
/// The object is kept raw because its shape depends on the event type;
/// payment events extract a typed view via
/// [`StripeEvent::payment_intent`].
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// Classify the event for dispatch.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => EventKind::PaymentSucceeded,
            "payment_intent.payment_failed" => EventKind::PaymentFailed,
            _ => EventKind::Other,
        }
    }

    /// Extract the payment-intent object from a payment event.
    #[must_use]
    pub fn payment_intent(&self) -> Option<PaymentIntentObject> {
        serde_json::from_value(self.data.object.clone()).ok()
    }
}

/// The payment-intent object carried by payment events.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    /// Stripe's intent id (pi_...)
    pub id: String,
    /// Charged amount in cents
    pub amount: i64,
    /// Checkout metadata attached when the intent was created
    #[serde(default)]
    pub metadata: PaymentMetadata,
    /// Failure detail, present on failed payments
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

/// Metadata the checkout flow attached to the intent.
///
/// Everything here crossed the wire twice (out to Stripe, back in the
/// webhook), so each field is optional and revalidated before use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMetadata {
    #[serde(rename = "applicationId")]
    pub application_id: Option<String>,
    #[serde(rename = "entityType")]
    pub entity_type: Option<String>,
    #[serde(rename = "serviceTier")]
    pub service_tier: Option<String>,
    #[serde(rename = "customerEmail")]
    pub customer_email: Option<String>,
}

impl PaymentMetadata {
    /// The customer email, when present and well formed.
    ///
    /// A malformed address is treated as absent: the operator still gets
    /// notified, the customer send is skipped.
    #[must_use]
    pub fn valid_customer_email(&self) -> Option<Email> {
        self.customer_email
            .as_deref()
            .and_then(|s| Email::parse(s).ok())
    }
}

/// Failure detail on a `payment_intent.payment_failed` event.
#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    pub message: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(&SecretString::from("whsec_test_secret"))
    }

    /// Build a valid `stripe-signature` header for `body` at `timestamp`.
    fn sign(secret: &str, timestamp: i64, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("valid key length");
        mac.update(format!("{timestamp}.{body}").as_bytes());
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn event_body() -> String {
        json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": "pi_1",
                    "amount": 24_900,
                    "metadata": {
                        "applicationId": "APP-1",
                        "entityType": "LLC",
                        "serviceTier": "standard",
                        "customerEmail": "jane@example.com",
                    },
                },
            },
        })
        .to_string()
    }

    #[test]
    fn test_verify_and_parse_valid() {
        let body = event_body();
        let header = sign("whsec_test_secret", Utc::now().timestamp(), &body);

        let event = verifier().verify_and_parse(&header, &body).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind(), EventKind::PaymentSucceeded);
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let body = event_body();
        let header = sign("whsec_test_secret", Utc::now().timestamp(), &body);
        let tampered = body.replace("24900", "100");

        let result = verifier().verify_and_parse(&header, &tampered);
        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let body = event_body();
        let header = sign("whsec_other_secret", Utc::now().timestamp(), &body);

        let result = verifier().verify_and_parse(&header, &body);
        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let body = event_body();
        let stale = Utc::now().timestamp() - 600;
        let header = sign("whsec_test_secret", stale, &body);

        let result = verifier().verify_and_parse(&header, &body);
        // Fails on age, not signature: the signature itself is valid
        assert!(matches!(result, Err(SignatureError::StaleTimestamp)));
    }

    #[test]
    fn test_verify_rejects_malformed_header() {
        let body = event_body();

        for header in ["", "t=123", "v1=abc", "nonsense", "t=abc,v1=def"] {
            let result = verifier().verify_and_parse(header, &body);
            assert!(
                matches!(result, Err(SignatureError::MalformedHeader)),
                "header {header:?} should be rejected as malformed"
            );
        }
    }

    #[test]
    fn test_verify_accepts_rotated_secret_candidates() {
        let body = event_body();
        let timestamp = Utc::now().timestamp();

        // First candidate from an old secret, second from the current one
        let old = sign("whsec_old_secret", timestamp, &body);
        let current = sign("whsec_test_secret", timestamp, &body);
        let old_sig = old.split("v1=").nth(1).unwrap();
        let header = format!("{current},v1={old_sig}");

        assert!(verifier().verify_and_parse(&header, &body).is_ok());
    }

    #[test]
    fn test_event_kind_classification() {
        let mut body: serde_json::Value = serde_json::from_str(&event_body()).unwrap();

        body["type"] = json!("payment_intent.payment_failed");
        let event: StripeEvent = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(event.kind(), EventKind::PaymentFailed);

        body["type"] = json!("charge.refunded");
        let event: StripeEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.kind(), EventKind::Other);
    }

    #[test]
    fn test_payment_intent_extraction() {
        let event: StripeEvent = serde_json::from_str(&event_body()).unwrap();
        let intent = event.payment_intent().unwrap();

        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.amount, 24_900);
        assert_eq!(
            intent.metadata.valid_customer_email().map(|e| e.to_string()),
            Some("jane@example.com".to_string())
        );
    }

    #[test]
    fn test_metadata_tolerates_garbage_email() {
        let metadata = PaymentMetadata {
            customer_email: Some("not-an-email".to_string()),
            ..PaymentMetadata::default()
        };
        assert!(metadata.valid_customer_email().is_none());

        let metadata = PaymentMetadata::default();
        assert!(metadata.valid_customer_email().is_none());
    }

    #[test]
    fn test_non_payment_event_parses_without_intent() {
        let body = json!({
            "id": "evt_2",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1", "email": "x@example.com" } },
        })
        .to_string();

        let event: StripeEvent = serde_json::from_str(&body).unwrap();
        assert_eq!(event.kind(), EventKind::Other);
        assert!(event.payment_intent().is_none());
    }

    #[test]
    fn test_verifier_debug_redacts_secret() {
        let debug_output = format!("{:?}", verifier());
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("whsec_test_secret"));
    }
}
