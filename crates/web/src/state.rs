//! Application state shared across handlers.

use std::sync::Arc;

use crate::admission::rate_limit::{CounterStoreError, RateLimiter, RestCounterStore};
use crate::config::WebConfig;
use crate::services::notify::Notifier;
use crate::services::openai::{OpenAiClient, OpenAiError};
use crate::services::resend::{ResendClient, ResendError};
use crate::services::stripe::{StripeClient, StripeError, WebhookVerifier};

/// Error assembling application state from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("stripe client: {0}")]
    Stripe(#[from] StripeError),
    #[error("resend client: {0}")]
    Resend(#[from] ResendError),
    #[error("openai client: {0}")]
    OpenAi(#[from] OpenAiError),
    #[error("counter store client: {0}")]
    CounterStore(#[from] CounterStoreError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// configuration and the provider clients. Clients for providers that are
/// not configured are `None`; the routes that need them answer 503.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: WebConfig,
    limiter: RateLimiter,
    stripe: Option<StripeClient>,
    webhooks: Option<WebhookVerifier>,
    notifier: Option<Notifier>,
    openai: Option<OpenAiClient>,
}

impl AppState {
    /// Build every configured provider client and assemble the state.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured provider client cannot be
    /// constructed. Providers that are simply not configured are skipped.
    pub fn new(config: WebConfig) -> Result<Self, StateError> {
        let limiter = match &config.counter_store {
            Some(store) => RateLimiter::with_store(RestCounterStore::new(store)?),
            None => RateLimiter::in_memory(),
        };

        let stripe = config.stripe().map(StripeClient::new).transpose()?;
        let webhooks = config
            .stripe()
            .and_then(|stripe| stripe.webhook_secret.as_ref())
            .map(WebhookVerifier::new);
        let notifier = config
            .resend()
            .map(|resend| -> Result<Notifier, ResendError> {
                let client = ResendClient::new(resend)?;
                Ok(Notifier::new(Arc::new(client), resend))
            })
            .transpose()?;
        let openai = config.openai().map(OpenAiClient::new).transpose()?;

        Ok(Self::from_parts(
            config, limiter, stripe, webhooks, notifier, openai,
        ))
    }

    /// Assemble state from already-built components.
    ///
    /// [`AppState::new`] is the production path; this constructor is the
    /// seam for wiring in doubles such as a recording mailer.
    #[must_use]
    pub fn from_parts(
        config: WebConfig,
        limiter: RateLimiter,
        stripe: Option<StripeClient>,
        webhooks: Option<WebhookVerifier>,
        notifier: Option<Notifier>,
        openai: Option<OpenAiClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                limiter,
                stripe,
                webhooks,
                notifier,
                openai,
            }),
        }
    }

    /// Get a reference to the web configuration.
    #[must_use]
    pub fn config(&self) -> &WebConfig {
        &self.inner.config
    }

    /// Get a reference to the rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Get a reference to the Stripe client, if configured.
    #[must_use]
    pub fn stripe(&self) -> Option<&StripeClient> {
        self.inner.stripe.as_ref()
    }

    /// Get a reference to the webhook signature verifier, if configured.
    #[must_use]
    pub fn webhooks(&self) -> Option<&WebhookVerifier> {
        self.inner.webhooks.as_ref()
    }

    /// Get a reference to the notification fan-out, if email is configured.
    #[must_use]
    pub fn notifier(&self) -> Option<&Notifier> {
        self.inner.notifier.as_ref()
    }

    /// Get a reference to the `OpenAI` client, if configured.
    #[must_use]
    pub fn openai(&self) -> Option<&OpenAiClient> {
        self.inner.openai.as_ref()
    }
}
