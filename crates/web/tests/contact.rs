//! HTTP-level tests for the operator contact routes.
//!
//! Drives `/api/priority-contact` and `/api/test-email` end to end with a
//! recording mailer double behind the notifier.

#![allow(clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use ein_direct_core::Email;
use ein_direct_web::admission::RateLimiter;
use ein_direct_web::config::{ResendConfig, WebConfig};
use ein_direct_web::routes;
use ein_direct_web::services::resend::ResendError;
use ein_direct_web::services::{Mailer, Notifier, OutboundEmail};
use ein_direct_web::state::AppState;
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

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

/// Router with email delivery wired to the given recording mailer.
fn app(mailer: Arc<RecordingMailer>) -> Router {
    let resend = ResendConfig {
        api_key: SecretString::from("re_test_key"),
        from_address: "EIN Direct <noreply@eindirect.test>".to_string(),
        operator_email: Email::parse("ops@eindirect.test").unwrap(),
    };
    let notifier = Notifier::new(mailer as Arc<dyn Mailer>, &resend);

    let config = WebConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        stripe: None,
        resend: Some(resend),
        openai: None,
        counter_store: None,
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.0,
    };

    let state = AppState::from_parts(
        config,
        RateLimiter::in_memory(),
        None,
        None,
        Some(notifier),
        None,
    );
    Router::new().merge(routes::routes()).with_state(state)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_priority_contact_delivers_one_operator_email() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(Arc::clone(&mailer));

    let response = app
        .oneshot(post_json(
            "/api/priority-contact",
            &json!({
                "name": "Jane Doe",
                "email": "jane@example.com",
                "phone": "(512) 555-0100",
                "subject": "Deadline question",
                "message": "Need my EIN before Friday, can you help?",
                "urgency": "urgent",
                "entityType": "LLC",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.as_str(), "ops@eindirect.test");
    assert!(sent[0].subject.contains("Jane Doe"));
    assert!(sent[0].text.contains("Deadline question"));
    assert!(sent[0].text.contains("urgent"));
}

#[tokio::test]
async fn test_priority_contact_strips_angle_brackets_from_name() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(Arc::clone(&mailer));

    let response = app
        .oneshot(post_json(
            "/api/priority-contact",
            &json!({
                "name": "Jane <b>Doe</b>",
                "email": "jane@example.com",
                "phone": "(512) 555-0100",
                "message": "hello there",
                "entityType": "LLC",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].subject.contains('<'));
    assert!(sent[0].subject.contains("Jane bDoe/b"));
}

#[tokio::test]
async fn test_priority_contact_rejects_bad_urgency() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(Arc::clone(&mailer));

    let response = app
        .oneshot(post_json(
            "/api/priority-contact",
            &json!({
                "name": "Jane Doe",
                "email": "jane@example.com",
                "phone": "(512) 555-0100",
                "message": "hello there",
                "urgency": "asap",
                "entityType": "LLC",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("urgency"));
    assert_eq!(mailer.sent.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn test_test_email_delivers_canned_message_to_operator() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(Arc::clone(&mailer));

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/test-email")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.as_str(), "ops@eindirect.test");
    assert!(sent[0].text.contains("outbound delivery is working"));
}
