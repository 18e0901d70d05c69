//! Unified error handling with Sentry integration.
//!
//! Provides a unified `ApiError` type that captures server-side failures to
//! Sentry before responding to the client. All API route handlers should
//! return `Result<T, ApiError>`. Admission rejections (429/400) are expected
//! traffic and are never reported as application errors.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;
use serde_json::json;
use thiserror::Error;

use crate::admission::rate_limit::RateLimitDecision;
use crate::admission::validation::ValidationError;
use crate::services::openai::OpenAiError;
use crate::services::resend::ResendError;
use crate::services::stripe::StripeError;

/// Application-level error type for the API routes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request rejected by the rate limiter.
    #[error("Rate limited")]
    RateLimited(RateLimitDecision),

    /// Request payload failed schema validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A provider credential required by this route is not configured.
    #[error("Service not configured")]
    ServiceUnavailable,

    /// Stripe API operation failed.
    #[error("Stripe error: {0}")]
    Stripe(#[from] StripeError),

    /// Email delivery failed during the primary business action.
    #[error("Email error: {0}")]
    Email(#[from] ResendError),

    /// Chat completion provider failed.
    #[error("OpenAI error: {0}")]
    OpenAi(#[from] OpenAiError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Capture provider and internal errors to Sentry. Admission
        // rejections and missing configuration are logged only.
        if matches!(
            self,
            Self::Stripe(_) | Self::Email(_) | Self::OpenAi(_) | Self::Internal(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        match self {
            Self::RateLimited(decision) => {
                tracing::info!(
                    limit = decision.limit,
                    reset_at = %decision.reset_at,
                    "Request rejected by rate limiter"
                );
                let body = Json(json!({
                    "error": "Too many requests, please try again later.",
                    "retryAfter": decision.retry_after_secs(),
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                insert_rate_limit_headers(response.headers_mut(), &decision);
                response
            }
            Self::Validation(err) => {
                tracing::debug!(error = %err, "Request payload failed validation");
                let body = Json(json!({ "error": err.to_string() }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            Self::ServiceUnavailable => {
                // Never tell the caller which credential is missing
                tracing::error!("Route requires a provider credential that is not configured");
                let body = Json(json!({ "error": "Service temporarily unavailable" }));
                (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
            }
            // Don't expose internal error details to clients
            Self::Stripe(_) | Self::Email(_) | Self::OpenAi(_) | Self::Internal(_) => {
                let body = Json(json!({ "error": "Internal server error" }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

/// Result type alias for `ApiError`.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Attach the `X-RateLimit-*` headers advertised on 429 responses.
pub fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert("x-ratelimit-reset", value);
    }
}
