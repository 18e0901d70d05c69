//! Payment and contact notification fan-out.
//!
//! Renders Askama HTML and plain-text template pairs and hands them to a
//! [`Mailer`] transport. Payment notifications are fan-out sends: each one
//! is supervised independently, so a failed customer email never cancels
//! the operator email, and neither ever fails the webhook acknowledgement.

use std::sync::Arc;

use askama::Template;
use async_trait::async_trait;
use chrono::Utc;
use ein_direct_core::{Email, PaymentAmount, ServiceTier};
use tokio::task::JoinSet;

use crate::admission::validation::PriorityContact;
use crate::config::ResendConfig;
use crate::services::resend::ResendError;
use crate::services::stripe::{EventKind, PaymentIntentObject};

/// A fully rendered email ready for the transport.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: Email,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Transport seam for outbound email.
///
/// The production implementation is
/// [`ResendClient`](crate::services::resend::ResendClient); tests
/// substitute a recording double.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one rendered email.
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), ResendError>;
}

// =============================================================================
// Templates
// =============================================================================

/// HTML template for the operator payment notification.
#[derive(Template)]
#[template(path = "email/payment_success_operator.html")]
struct PaymentSuccessOperatorHtml<'a> {
    intent_id: &'a str,
    amount: &'a str,
    tier: &'a str,
    application_id: &'a str,
    entity_type: &'a str,
    customer_email: &'a str,
}

/// Plain text template for the operator payment notification.
#[derive(Template)]
#[template(path = "email/payment_success_operator.txt")]
struct PaymentSuccessOperatorText<'a> {
    intent_id: &'a str,
    amount: &'a str,
    tier: &'a str,
    application_id: &'a str,
    entity_type: &'a str,
    customer_email: &'a str,
}

/// HTML template for the customer payment confirmation.
#[derive(Template)]
#[template(path = "email/payment_success_customer.html")]
struct PaymentSuccessCustomerHtml<'a> {
    amount: &'a str,
    tier: &'a str,
    estimate: &'a str,
}

/// Plain text template for the customer payment confirmation.
#[derive(Template)]
#[template(path = "email/payment_success_customer.txt")]
struct PaymentSuccessCustomerText<'a> {
    amount: &'a str,
    tier: &'a str,
    estimate: &'a str,
}

/// HTML template for the operator payment-failure notification.
#[derive(Template)]
#[template(path = "email/payment_failed_operator.html")]
struct PaymentFailedOperatorHtml<'a> {
    intent_id: &'a str,
    amount: &'a str,
    reason: &'a str,
}

/// Plain text template for the operator payment-failure notification.
#[derive(Template)]
#[template(path = "email/payment_failed_operator.txt")]
struct PaymentFailedOperatorText<'a> {
    intent_id: &'a str,
    amount: &'a str,
    reason: &'a str,
}

/// HTML template for a priority support request.
#[derive(Template)]
#[template(path = "email/priority_contact.html")]
struct PriorityContactHtml<'a> {
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    subject: &'a str,
    message: &'a str,
    urgency: &'a str,
    entity_type: &'a str,
}

/// Plain text template for a priority support request.
#[derive(Template)]
#[template(path = "email/priority_contact.txt")]
struct PriorityContactText<'a> {
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    subject: &'a str,
    message: &'a str,
    urgency: &'a str,
    entity_type: &'a str,
}

/// HTML template for the delivery smoke-test email.
#[derive(Template)]
#[template(path = "email/test_email.html")]
struct TestEmailHtml<'a> {
    sent_at: &'a str,
}

/// Plain text template for the delivery smoke-test email.
#[derive(Template)]
#[template(path = "email/test_email.txt")]
struct TestEmailText<'a> {
    sent_at: &'a str,
}

// =============================================================================
// Notifier
// =============================================================================

/// Sends payment and contact notifications through a [`Mailer`].
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    operator_email: Email,
}

impl Notifier {
    /// Create a notifier over the given transport.
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>, config: &ResendConfig) -> Self {
        Self {
            mailer,
            operator_email: config.operator_email.clone(),
        }
    }

    /// Send every notification owed for a payment event, one task per
    /// recipient.
    ///
    /// Successful payments notify the operator and, when checkout captured
    /// a usable address, the customer. Failed payments notify the operator
    /// only; the customer already saw the failure in their browser. Every
    /// failure here is logged and swallowed: callers run this off the
    /// acknowledgement path and must never see it fail.
    pub async fn notify_payment(&self, kind: EventKind, intent: &PaymentIntentObject) {
        let emails = match kind {
            EventKind::PaymentSucceeded => self.success_emails(intent),
            EventKind::PaymentFailed => self.failure_emails(intent),
            EventKind::Other => Vec::new(),
        };

        // One task per send: a slow or panicking delivery cannot hold up
        // or take down a sibling send
        let mut sends = JoinSet::new();
        for email in emails {
            let mailer = Arc::clone(&self.mailer);
            sends.spawn(async move {
                if let Err(e) = mailer.deliver(&email).await {
                    tracing::error!(
                        to = %email.to,
                        subject = %email.subject,
                        "Notification delivery failed: {e}"
                    );
                }
            });
        }

        while let Some(joined) = sends.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Notification send task failed: {e}");
            }
        }
    }

    /// Send a priority support request to the operator.
    ///
    /// Unlike payment fan-out this is the route's primary action, so the
    /// error propagates to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or delivery fails.
    pub async fn send_priority_contact(&self, contact: &PriorityContact) -> Result<(), ResendError> {
        let form_subject = contact.subject.as_deref().unwrap_or("not provided");
        let html = PriorityContactHtml {
            name: &contact.name,
            email: contact.email.as_str(),
            phone: &contact.phone,
            subject: form_subject,
            message: &contact.message,
            urgency: contact.urgency.as_str(),
            entity_type: &contact.entity_type,
        }
        .render()?;
        let text = PriorityContactText {
            name: &contact.name,
            email: contact.email.as_str(),
            phone: &contact.phone,
            subject: form_subject,
            message: &contact.message,
            urgency: contact.urgency.as_str(),
            entity_type: &contact.entity_type,
        }
        .render()?;

        let email = OutboundEmail {
            to: self.operator_email.clone(),
            subject: format!("Priority support request from {}", contact.name),
            html,
            text,
        };

        self.mailer.deliver(&email).await
    }

    /// Send a delivery smoke-test email to the operator.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or delivery fails.
    pub async fn send_test_email(&self) -> Result<(), ResendError> {
        let sent_at = Utc::now().to_rfc3339();
        let html = TestEmailHtml { sent_at: &sent_at }.render()?;
        let text = TestEmailText { sent_at: &sent_at }.render()?;

        let email = OutboundEmail {
            to: self.operator_email.clone(),
            subject: "EIN Direct delivery test".to_string(),
            html,
            text,
        };

        self.mailer.deliver(&email).await
    }

    fn success_emails(&self, intent: &PaymentIntentObject) -> Vec<OutboundEmail> {
        let mut emails = Vec::new();

        match self.render_success_operator(intent) {
            Ok(email) => emails.push(email),
            Err(e) => tracing::error!("Failed to render operator notification: {e}"),
        }

        if let Some(customer) = intent.metadata.valid_customer_email() {
            match render_success_customer(customer, intent) {
                Ok(email) => emails.push(email),
                Err(e) => tracing::error!("Failed to render customer notification: {e}"),
            }
        }

        emails
    }

    fn failure_emails(&self, intent: &PaymentIntentObject) -> Vec<OutboundEmail> {
        match self.render_failure_operator(intent) {
            Ok(email) => vec![email],
            Err(e) => {
                tracing::error!("Failed to render operator notification: {e}");
                Vec::new()
            }
        }
    }

    fn render_success_operator(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<OutboundEmail, ResendError> {
        let amount = format_amount(intent.amount);
        let tier = tier_name(intent);
        let application_id = intent
            .metadata
            .application_id
            .as_deref()
            .unwrap_or("not provided");
        let entity_type = intent
            .metadata
            .entity_type
            .as_deref()
            .unwrap_or("not provided");
        let customer_email = intent
            .metadata
            .customer_email
            .as_deref()
            .unwrap_or("not provided");

        let html = PaymentSuccessOperatorHtml {
            intent_id: &intent.id,
            amount: &amount,
            tier,
            application_id,
            entity_type,
            customer_email,
        }
        .render()?;
        let text = PaymentSuccessOperatorText {
            intent_id: &intent.id,
            amount: &amount,
            tier,
            application_id,
            entity_type,
            customer_email,
        }
        .render()?;

        Ok(OutboundEmail {
            to: self.operator_email.clone(),
            subject: "EIN filing payment received".to_string(),
            html,
            text,
        })
    }

    fn render_failure_operator(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<OutboundEmail, ResendError> {
        let amount = format_amount(intent.amount);
        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.as_deref())
            .unwrap_or("no failure detail from Stripe");

        let html = PaymentFailedOperatorHtml {
            intent_id: &intent.id,
            amount: &amount,
            reason,
        }
        .render()?;
        let text = PaymentFailedOperatorText {
            intent_id: &intent.id,
            amount: &amount,
            reason,
        }
        .render()?;

        Ok(OutboundEmail {
            to: self.operator_email.clone(),
            subject: "EIN filing payment failed".to_string(),
            html,
            text,
        })
    }
}

fn render_success_customer(
    customer: Email,
    intent: &PaymentIntentObject,
) -> Result<OutboundEmail, ResendError> {
    let amount = format_amount(intent.amount);
    let tier = tier_name(intent);
    let estimate = tier_of(intent).map_or("24-48 hours", ServiceTier::processing_estimate);

    let html = PaymentSuccessCustomerHtml {
        amount: &amount,
        tier,
        estimate,
    }
    .render()?;
    let text = PaymentSuccessCustomerText {
        amount: &amount,
        tier,
        estimate,
    }
    .render()?;

    Ok(OutboundEmail {
        to: customer,
        subject: "Your EIN filing is underway".to_string(),
        html,
        text,
    })
}

/// The tier of a paid intent: trust the metadata, fall back to the amount.
fn tier_of(intent: &PaymentIntentObject) -> Option<ServiceTier> {
    intent
        .metadata
        .service_tier
        .as_deref()
        .and_then(|s| ServiceTier::parse(s).ok())
        .or_else(|| {
            PaymentAmount::from_dollars(intent.amount.div_euclid(100))
                .ok()
                .map(PaymentAmount::tier)
        })
}

fn tier_name(intent: &PaymentIntentObject) -> &'static str {
    tier_of(intent).map_or("standard", ServiceTier::as_str)
}

/// Format cents as a dollar string, e.g. `$249.00`.
fn format_amount(cents: i64) -> String {
    format!("${}.{:02}", cents.div_euclid(100), cents.rem_euclid(100))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::admission::validation::Urgency;
    use crate::services::stripe::StripeEvent;

    /// Mailer double that records every delivered email.
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn deliver(&self, email: &OutboundEmail) -> Result<(), ResendError> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    /// Mailer double that always fails.
    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn deliver(&self, _email: &OutboundEmail) -> Result<(), ResendError> {
            Err(ResendError::Api {
                status: 500,
                message: "simulated outage".to_string(),
            })
        }
    }

    fn notifier(mailer: Arc<dyn Mailer>) -> Notifier {
        let config = ResendConfig {
            api_key: SecretString::from("re_test_key"),
            from_address: "EIN Direct <noreply@eindirect.test>".to_string(),
            operator_email: Email::parse("ops@eindirect.test").unwrap(),
        };
        Notifier::new(mailer, &config)
    }

    fn paid_intent(customer_email: Option<&str>) -> PaymentIntentObject {
        let mut object = json!({
            "id": "pi_1",
            "amount": 24_900,
            "metadata": {
                "applicationId": "APP-1",
                "entityType": "LLC",
                "serviceTier": "standard",
            },
        });
        if let Some(email) = customer_email {
            object["metadata"]["customerEmail"] = json!(email);
        }
        serde_json::from_value(object).unwrap()
    }

    fn failed_intent() -> PaymentIntentObject {
        let event: StripeEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "data": {
                "object": {
                    "id": "pi_2",
                    "amount": 32_900,
                    "metadata": { "customerEmail": "jane@example.com" },
                    "last_payment_error": { "message": "Your card was declined." },
                },
            },
        }))
        .unwrap();
        event.payment_intent().unwrap()
    }

    #[tokio::test]
    async fn test_success_notifies_operator_and_customer() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        notifier
            .notify_payment(
                EventKind::PaymentSucceeded,
                &paid_intent(Some("jane@example.com")),
            )
            .await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        // Sends race on separate tasks; look recipients up by address
        let operator = sent
            .iter()
            .find(|email| email.to.as_str() == "ops@eindirect.test")
            .unwrap();
        let customer = sent
            .iter()
            .find(|email| email.to.as_str() == "jane@example.com")
            .unwrap();
        assert!(operator.subject.contains("payment received"));
        assert!(customer.subject.contains("underway"));
    }

    #[tokio::test]
    async fn test_success_without_customer_email_notifies_operator_only() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        notifier
            .notify_payment(EventKind::PaymentSucceeded, &paid_intent(None))
            .await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.as_str(), "ops@eindirect.test");
    }

    #[tokio::test]
    async fn test_success_with_garbage_customer_email_skips_customer_send() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        notifier
            .notify_payment(
                EventKind::PaymentSucceeded,
                &paid_intent(Some("not-an-email")),
            )
            .await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_notifies_operator_only() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        notifier
            .notify_payment(EventKind::PaymentFailed, &failed_intent())
            .await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.as_str(), "ops@eindirect.test");
        assert!(sent[0].subject.contains("failed"));
        assert!(sent[0].text.contains("Your card was declined."));
    }

    #[tokio::test]
    async fn test_other_events_send_nothing() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        notifier
            .notify_payment(EventKind::Other, &paid_intent(None))
            .await;

        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failures_are_swallowed() {
        let notifier = notifier(Arc::new(FailingMailer));

        // Must complete without propagating the transport failure
        notifier
            .notify_payment(
                EventKind::PaymentSucceeded,
                &paid_intent(Some("jane@example.com")),
            )
            .await;
    }

    #[tokio::test]
    async fn test_priority_contact_goes_to_operator() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        let contact = PriorityContact {
            name: "Jane Doe".to_string(),
            email: Email::parse("jane@example.com").unwrap(),
            phone: "555 123 4567".to_string(),
            subject: Some("Deadline question".to_string()),
            message: "Need my EIN before Friday.".to_string(),
            urgency: Urgency::Urgent,
            entity_type: "LLC".to_string(),
        };
        notifier.send_priority_contact(&contact).await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.as_str(), "ops@eindirect.test");
        assert!(sent[0].subject.contains("Jane Doe"));
        assert!(sent[0].text.contains("Need my EIN before Friday."));
        assert!(sent[0].text.contains("Deadline question"));
        assert!(sent[0].text.contains("urgent"));
    }

    #[tokio::test]
    async fn test_priority_contact_propagates_transport_failure() {
        let notifier = notifier(Arc::new(FailingMailer));

        let contact = PriorityContact {
            name: "Jane Doe".to_string(),
            email: Email::parse("jane@example.com").unwrap(),
            phone: "555 123 4567".to_string(),
            subject: None,
            message: "hello".to_string(),
            urgency: Urgency::Normal,
            entity_type: "LLC".to_string(),
        };
        let result = notifier.send_priority_contact(&contact).await;

        assert!(matches!(result, Err(ResendError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_test_email_goes_to_operator() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(Arc::clone(&mailer) as Arc<dyn Mailer>);

        notifier.send_test_email().await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.as_str(), "ops@eindirect.test");
        assert!(sent[0].text.contains("outbound delivery is working"));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(24_900), "$249.00");
        assert_eq!(format_amount(32_900), "$329.00");
        assert_eq!(format_amount(105), "$1.05");
    }

    #[test]
    fn test_tier_falls_back_to_amount() {
        let intent: PaymentIntentObject = serde_json::from_value(json!({
            "id": "pi_3",
            "amount": 32_900,
            "metadata": {},
        }))
        .unwrap();

        assert_eq!(tier_of(&intent), Some(ServiceTier::Express));
        assert_eq!(tier_name(&intent), "express");
    }
}
