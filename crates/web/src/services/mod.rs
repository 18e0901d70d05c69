//! External provider clients and notification delivery.
//!
//! # Services
//!
//! - `stripe` - Payment intent creation and webhook signature verification
//! - `resend` - Outbound email transport via the Resend API
//! - `notify` - Rendered notifications and payment fan-out
//! - `openai` - Streamed chat completions for the sales assistant

pub mod notify;
pub mod openai;
pub mod resend;
pub mod stripe;

pub use notify::{Mailer, Notifier, OutboundEmail};
pub use openai::{OpenAiClient, OpenAiError};
pub use resend::{ResendClient, ResendError};
pub use stripe::{EventKind, StripeClient, StripeError, WebhookVerifier};
