//! Eager request-payload validation.
//!
//! Every schema walks the whole payload and reports all field errors in one
//! pass, so a client can fix a form in a single round trip. Unknown fields
//! are dropped. Each schema returns a typed struct; handlers never touch
//! the raw payload again once admission finishes.

use core::fmt;
use std::sync::LazyLock;

use ein_direct_core::{ApplicationId, ApplicationIdError, Email, PaymentAmount, ServiceTier};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::sanitize;

/// Regex for US ZIP and ZIP+4 codes.
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("Invalid regex"));

/// Regex for phone numbers: digits plus common grouping characters.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s()-]{10,15}$").expect("Invalid regex"));

/// Regex for social security numbers, dashed or bare.
static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{3}-\d{2}-\d{4}|\d{9})$").expect("Invalid regex"));

const PHONE_MESSAGE: &str = "must be 10 to 15 digits, spaces, parentheses, or hyphens";

/// A single field-level failure.
#[derive(Debug, Clone)]
pub struct FieldError {
    /// Dotted path of the offending field in the request payload
    pub path: String,
    /// What the field must look like instead
    pub message: String,
}

/// Every field error found in one validation pass.
///
/// Renders as a comma-separated list of `path: message` pairs, which is
/// exactly the summary a 400 response body carries.
#[derive(Debug, Error)]
#[error("{}", render(.errors))]
pub struct ValidationError {
    errors: Vec<FieldError>,
}

impl ValidationError {
    /// The individual field failures, in schema order.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// A one-field failure, for rejections outside schema validation
    /// such as a body that is not JSON at all.
    #[must_use]
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                path: path.into(),
                message: message.into(),
            }],
        }
    }
}

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.path, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accumulates field errors across a whole payload walk.
#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: Vec<FieldError>,
}

impl FieldErrors {
    /// Record a failure for one field.
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Whether the walk has recorded any failure so far.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Resolve the pass: the validated value if clean, otherwise every
    /// recorded failure.
    ///
    /// # Errors
    ///
    /// Returns the accumulated `ValidationError` when any field failed.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.into_error())
        }
    }

    fn into_error(self) -> ValidationError {
        ValidationError {
            errors: self.errors,
        }
    }
}

// =============================================================================
// Validated payloads
// =============================================================================

/// A validated payment-intent creation request.
#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    /// Charge amount, always one of the two offered price points
    pub amount: PaymentAmount,
    /// Client-minted id tying the charge back to its form session
    pub application_id: ApplicationId,
    /// Legal entity type the customer selected
    pub entity_type: String,
    /// Receipt recipient, when the customer provided one
    pub customer_email: Option<Email>,
    /// Tier implied by the amount
    pub tier: ServiceTier,
}

/// Author of one chat transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One validated chat transcript entry.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// A validated chat request: the full transcript so far.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// A validated EIN filing application.
///
/// `Debug` redacts the SSN so request logging can never leak it. Terms
/// agreement is enforced during validation and not carried on the struct.
#[derive(Clone)]
pub struct EinApplication {
    pub business_name: String,
    pub entity_type: String,
    pub business_address: String,
    pub business_city: String,
    pub business_zip: String,
    pub contact_email: Email,
    pub contact_phone: String,
    pub contact_ssn: String,
    /// Selected service level; standard when the form omits it
    pub service_tier: ServiceTier,
}

impl fmt::Debug for EinApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EinApplication")
            .field("business_name", &self.business_name)
            .field("entity_type", &self.entity_type)
            .field("business_address", &self.business_address)
            .field("business_city", &self.business_city)
            .field("business_zip", &self.business_zip)
            .field("contact_email", &self.contact_email)
            .field("contact_phone", &self.contact_phone)
            .field("contact_ssn", &"[REDACTED]")
            .field("service_tier", &self.service_tier)
            .finish()
    }
}

/// Triage level the caller assigns to a priority-support request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Urgency {
    /// Wire name of the urgency level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// A validated priority-support contact request.
#[derive(Debug, Clone)]
pub struct PriorityContact {
    pub name: String,
    pub email: Email,
    pub phone: String,
    pub subject: Option<String>,
    pub message: String,
    pub urgency: Urgency,
    pub entity_type: String,
}

// =============================================================================
// Schemas
// =============================================================================

/// Validate a payment-intent creation payload.
///
/// The amount is authoritative for the tier. A `serviceTier` field is
/// accepted for explicitness but must agree with the amount; a
/// contradiction is a field error, never a silent override.
///
/// # Errors
///
/// Returns every field error found in the payload.
pub fn payment_intent(payload: &Value) -> Result<PaymentIntentRequest, ValidationError> {
    let mut errors = FieldErrors::default();

    let amount = match payload.get("amount") {
        None | Some(Value::Null) => {
            errors.push("amount", "is required");
            None
        }
        Some(value) => match value.as_i64() {
            Some(dollars) => match PaymentAmount::from_dollars(dollars) {
                Ok(amount) => Some(amount),
                Err(_) => {
                    errors.push("amount", "must be 249 or 329");
                    None
                }
            },
            None => {
                errors.push("amount", "must be a whole number of dollars");
                None
            }
        },
    };

    let application_id =
        required_str(payload, "applicationId", &mut errors).and_then(|s| {
            match ApplicationId::parse(s) {
                Ok(id) => Some(id),
                Err(ApplicationIdError::Empty) => {
                    errors.push("applicationId", "is required");
                    None
                }
                Err(ApplicationIdError::TooLong { max }) => {
                    errors.push("applicationId", format!("must be at most {max} characters"));
                    None
                }
            }
        });

    let entity_type = bounded_str(payload, "entityType", 1, 50, &mut errors);

    let customer_email = match payload.get("customerEmail") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match Email::parse(&sanitize::sanitize_email(s)) {
            Ok(email) => Some(email),
            Err(_) => {
                errors.push("customerEmail", "must be a valid email address");
                None
            }
        },
        Some(_) => {
            errors.push("customerEmail", "must be a string");
            None
        }
    };

    let tier = match payload.get("serviceTier") {
        None | Some(Value::Null) => amount.map(PaymentAmount::tier),
        Some(Value::String(s)) => match ServiceTier::parse(s) {
            Ok(tier) => {
                if let Some(amount) = amount {
                    if amount.tier() != tier {
                        errors.push("serviceTier", "does not match the amount");
                    }
                }
                Some(tier)
            }
            Err(_) => {
                errors.push("serviceTier", "must be \"standard\" or \"express\"");
                None
            }
        },
        Some(_) => {
            errors.push("serviceTier", "must be a string");
            None
        }
    };

    match (amount, application_id, entity_type, tier) {
        (Some(amount), Some(application_id), Some(entity_type), Some(tier))
            if errors.is_empty() =>
        {
            Ok(PaymentIntentRequest {
                amount,
                application_id,
                entity_type,
                customer_email,
                tier,
            })
        }
        _ => Err(errors.into_error()),
    }
}

/// Validate a chat payload: a transcript of 1 to 50 messages.
///
/// # Errors
///
/// Returns every field error found in the payload, including per-message
/// errors addressed as `messages.N.field`.
pub fn chat_messages(payload: &Value) -> Result<ChatRequest, ValidationError> {
    let mut errors = FieldErrors::default();

    let raw = match payload.get("messages") {
        None | Some(Value::Null) => {
            errors.push("messages", "is required");
            return Err(errors.into_error());
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push("messages", "must be an array");
            return Err(errors.into_error());
        }
    };

    if raw.is_empty() || raw.len() > 50 {
        errors.push("messages", "must contain between 1 and 50 messages");
    }

    let mut messages = Vec::with_capacity(raw.len());
    for (index, item) in raw.iter().enumerate() {
        let role_path = format!("messages.{index}.role");
        let role = match item.get("role") {
            None | Some(Value::Null) => {
                errors.push(role_path, "is required");
                None
            }
            Some(Value::String(s)) => match s.as_str() {
                "user" => Some(ChatRole::User),
                "assistant" => Some(ChatRole::Assistant),
                "system" => Some(ChatRole::System),
                _ => {
                    errors.push(role_path, "must be \"user\", \"assistant\", or \"system\"");
                    None
                }
            },
            Some(_) => {
                errors.push(role_path, "must be a string");
                None
            }
        };

        let content_path = format!("messages.{index}.content");
        let content = match item.get("content") {
            None | Some(Value::Null) => {
                errors.push(content_path, "is required");
                None
            }
            Some(Value::String(s)) => check_len(s, &content_path, 1, 2000, &mut errors),
            Some(_) => {
                errors.push(content_path, "must be a string");
                None
            }
        };

        if let (Some(role), Some(content)) = (role, content) {
            messages.push(ChatMessage { role, content });
        }
    }

    errors.into_result(ChatRequest { messages })
}

/// Validate an EIN filing application payload.
///
/// # Errors
///
/// Returns every field error found in the payload.
pub fn ein_application(payload: &Value) -> Result<EinApplication, ValidationError> {
    let mut errors = FieldErrors::default();

    let business_name = bounded_str(payload, "businessName", 1, 200, &mut errors);
    let entity_type = bounded_str(payload, "entityType", 1, 50, &mut errors);
    let business_address = bounded_str(payload, "businessAddress", 1, 300, &mut errors);
    let business_city = bounded_str(payload, "businessCity", 1, 100, &mut errors);
    let business_zip = pattern_str(
        payload,
        "businessZip",
        &ZIP_RE,
        "must be a ZIP or ZIP+4 code",
        &mut errors,
    );
    let contact_email = email_field(payload, "contactEmail", &mut errors);
    let contact_phone = pattern_str(payload, "contactPhone", &PHONE_RE, PHONE_MESSAGE, &mut errors);
    let contact_ssn = pattern_str(
        payload,
        "contactSSN",
        &SSN_RE,
        "must be a social security number",
        &mut errors,
    );

    let service_tier = match payload.get("serviceTier") {
        None | Some(Value::Null) => Some(ServiceTier::default()),
        Some(Value::String(s)) => match ServiceTier::parse(s) {
            Ok(tier) => Some(tier),
            Err(_) => {
                errors.push("serviceTier", "must be \"standard\" or \"express\"");
                None
            }
        },
        Some(_) => {
            errors.push("serviceTier", "must be a string");
            None
        }
    };

    match payload.get("agreeToTerms") {
        Some(Value::Bool(true)) => {}
        None | Some(Value::Null) => errors.push("agreeToTerms", "is required"),
        Some(_) => errors.push("agreeToTerms", "must be accepted"),
    }

    match (
        business_name,
        entity_type,
        business_address,
        business_city,
        business_zip,
        contact_email,
        contact_phone,
        contact_ssn,
        service_tier,
    ) {
        (
            Some(business_name),
            Some(entity_type),
            Some(business_address),
            Some(business_city),
            Some(business_zip),
            Some(contact_email),
            Some(contact_phone),
            Some(contact_ssn),
            Some(service_tier),
        ) if errors.is_empty() => Ok(EinApplication {
            business_name,
            entity_type,
            business_address,
            business_city,
            business_zip,
            contact_email,
            contact_phone,
            contact_ssn,
            service_tier,
        }),
        _ => Err(errors.into_error()),
    }
}

/// Validate a priority-support contact payload.
///
/// # Errors
///
/// Returns every field error found in the payload.
pub fn priority_contact(payload: &Value) -> Result<PriorityContact, ValidationError> {
    let mut errors = FieldErrors::default();

    let name = bounded_str(payload, "name", 1, 100, &mut errors);
    let email = email_field(payload, "email", &mut errors);
    let phone = pattern_str(payload, "phone", &PHONE_RE, PHONE_MESSAGE, &mut errors);
    let message = bounded_str(payload, "message", 1, 2000, &mut errors);
    let entity_type = bounded_str(payload, "entityType", 1, 50, &mut errors);

    // An empty subject is the same as no subject
    let subject = match payload.get("subject") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => check_len(s, "subject", 1, 200, &mut errors),
        Some(_) => {
            errors.push("subject", "must be a string");
            None
        }
    };

    let urgency = match payload.get("urgency") {
        None | Some(Value::Null) => Some(Urgency::default()),
        Some(Value::String(s)) => match s.as_str() {
            "low" => Some(Urgency::Low),
            "normal" => Some(Urgency::Normal),
            "high" => Some(Urgency::High),
            "urgent" => Some(Urgency::Urgent),
            _ => {
                errors.push(
                    "urgency",
                    "must be \"low\", \"normal\", \"high\", or \"urgent\"",
                );
                None
            }
        },
        Some(_) => {
            errors.push("urgency", "must be a string");
            None
        }
    };

    match (name, email, phone, message, entity_type, urgency) {
        (Some(name), Some(email), Some(phone), Some(message), Some(entity_type), Some(urgency))
            if errors.is_empty() =>
        {
            Ok(PriorityContact {
                name,
                email,
                phone,
                subject,
                message,
                urgency,
                entity_type,
            })
        }
        _ => Err(errors.into_error()),
    }
}

// =============================================================================
// Field helpers
// =============================================================================

fn required_str<'a>(payload: &'a Value, path: &str, errors: &mut FieldErrors) -> Option<&'a str> {
    match payload.get(path) {
        None | Some(Value::Null) => {
            errors.push(path, "is required");
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            errors.push(path, "must be a string");
            None
        }
    }
}

fn bounded_str(
    payload: &Value,
    path: &str,
    min: usize,
    max: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    let s = required_str(payload, path, errors)?;
    check_len(s, path, min, max, errors)
}

fn check_len(
    s: &str,
    path: &str,
    min: usize,
    max: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    let len = s.chars().count();
    if len < min {
        if min == 1 {
            errors.push(path, "is required");
        } else {
            errors.push(path, format!("must be at least {min} characters"));
        }
        return None;
    }
    if len > max {
        errors.push(path, format!("must be at most {max} characters"));
        return None;
    }
    Some(s.to_owned())
}

fn pattern_str(
    payload: &Value,
    path: &str,
    pattern: &Regex,
    message: &str,
    errors: &mut FieldErrors,
) -> Option<String> {
    let s = required_str(payload, path, errors)?;
    if pattern.is_match(s) {
        Some(s.to_owned())
    } else {
        errors.push(path, message);
        None
    }
}

fn email_field(payload: &Value, path: &str, errors: &mut FieldErrors) -> Option<Email> {
    let s = required_str(payload, path, errors)?;
    // Normalized before parsing, so the typed value is already canonical
    match Email::parse(&sanitize::sanitize_email(s)) {
        Ok(email) => Some(email),
        Err(_) => {
            errors.push(path, "must be a valid email address");
            None
        }
    }
}
