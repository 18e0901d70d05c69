//! Resend API client for transactional email delivery.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::ResendConfig;
use crate::services::notify::{Mailer, OutboundEmail};

/// Resend API base URL.
const RESEND_API_BASE: &str = "https://api.resend.com";

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum ResendError {
    /// HTTP transport error.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Resend answered non-2xx.
    #[error("Resend API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Unreadable Resend response.
    #[error("Failed to parse Resend response: {0}")]
    Parse(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Email delivery client backed by the Resend REST API.
#[derive(Clone)]
pub struct ResendClient {
    client: reqwest::Client,
    from_address: String,
}

/// Response body of a successful send.
#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

impl ResendClient {
    /// Create a new Resend client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key cannot form a valid header or the
    /// HTTP client cannot be constructed.
    pub fn new(config: &ResendConfig) -> Result<Self, ResendError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.api_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| ResendError::Parse(format!("Invalid API key: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Mailer for ResendClient {
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), ResendError> {
        let payload = json!({
            "from": self.from_address,
            "to": [email.to.as_str()],
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
        });

        let response = self
            .client
            .post(format!("{RESEND_API_BASE}/emails"))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ResendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let accepted: SendResponse = response
            .json()
            .await
            .map_err(|e| ResendError::Parse(e.to_string()))?;

        tracing::info!(
            email_id = %accepted.id,
            to = %email.to,
            subject = %email.subject,
            "Email accepted for delivery"
        );

        Ok(())
    }
}
