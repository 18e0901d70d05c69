//! Post-validation input sanitizers.
//!
//! Validation decides whether a payload is acceptable; sanitizers normalize
//! accepted values before they reach a provider API or an email template.
//! Every sanitizer is idempotent, so re-sanitizing a stored value never
//! changes it again.

/// Longest free-text value passed through to providers and templates.
const MAX_STRING_CHARS: usize = 1000;

/// Normalize a free-text field.
///
/// Drops angle brackets, caps the length, then trims edge whitespace. Trim
/// runs last so a cut that exposes trailing whitespace is still cleaned up.
#[must_use]
pub fn sanitize_string(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_STRING_CHARS)
        .collect();
    cleaned.trim().to_owned()
}

/// Normalize an email address to its canonical lowercase form.
#[must_use]
pub fn sanitize_email(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Normalize a phone number to digits and common grouping characters.
#[must_use]
pub fn sanitize_phone(input: &str) -> String {
    let kept: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ' ' | '(' | ')' | '-'))
        .collect();
    kept.trim().to_owned()
}
