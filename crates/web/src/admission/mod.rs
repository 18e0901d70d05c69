//! Request admission: identity, rate limiting, validation, sanitization.
//!
//! Every API route runs the same sequence before its handler does any real
//! work: resolve the caller identity, probe the rate limiter, then validate
//! and sanitize the payload. The rate check happens before the payload is
//! parsed, so over-quota traffic is shed at the cheapest point.

pub mod client_ip;
pub mod rate_limit;
pub mod sanitize;
pub mod validation;

use axum::http::HeaderMap;

pub use rate_limit::{EndpointClass, RateLimitDecision, RateLimiter};

use crate::error::ApiError;
use crate::state::AppState;

/// Evidence that a request cleared identity resolution and rate limiting.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Resolved caller identity (proxy-reported address)
    pub identity: String,
    /// The limiter's decision; absent when the backend failed open
    pub decision: Option<RateLimitDecision>,
}

/// Run the pre-payload admission steps for one request.
///
/// Identity resolution cannot fail. A limiter backend failure admits the
/// request rather than rejecting it.
///
/// # Errors
///
/// Returns [`ApiError::RateLimited`] when the caller is over quota for
/// this endpoint class.
pub async fn check(
    state: &AppState,
    headers: &HeaderMap,
    class: EndpointClass,
) -> Result<Admission, ApiError> {
    let identity = client_ip::client_ip(headers);

    match state.limiter().check(&identity, class).await {
        Some(decision) if !decision.allowed => Err(ApiError::RateLimited(decision)),
        decision => Ok(Admission { identity, decision }),
    }
}
