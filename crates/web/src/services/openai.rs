//! OpenAI chat completion client for the sales assistant.
//!
//! Streams completion deltas over SSE so the widget can render the reply
//! as it is generated.

use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::admission::validation::{ChatMessage, ChatRole};
use crate::config::OpenAiConfig;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Instructions pinning the assistant to EIN filing sales support.
const SYSTEM_PROMPT: &str = "You are the EIN Direct assistant, helping visitors who want a federal \
Employer Identification Number (EIN) for their new business.\n\
\n\
EIN Direct offers two services:\n\
- Standard: $249, EIN delivered within 24-48 hours.\n\
- Express: $329, EIN delivered the same business day.\n\
\n\
Answer questions about what an EIN is, who needs one, what information the \
application requires, and how the two services differ. Keep replies short, \
plain, and friendly. When a visitor seems ready, invite them to start their \
application on this page.\n\
\n\
You are not a lawyer or an accountant. For legal or tax advice, recommend \
consulting a licensed professional instead of answering.";

/// Errors that can occur when talking to the OpenAI API.
#[derive(Debug, Error)]
pub enum OpenAiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API returned an error.
    #[error("API error ({error_type}): {message}")]
    Api {
        /// Error type from the API.
        error_type: String,
        /// Error message.
        message: String,
    },

    /// Rate limited by the API.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Failed to parse a response.
    #[error("parse error: {0}")]
    Parse(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    max_tokens: u32,
}

/// One SSE chunk of a streamed completion.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionChunk {
    /// The text carried by this chunk, if any.
    ///
    /// Role-announcement and finish chunks carry no content and are
    /// dropped here rather than surfacing as empty writes.
    fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

/// OpenAI chat completion client.
#[derive(Clone)]
pub struct OpenAiClient {
    inner: Arc<OpenAiClientInner>,
}

struct OpenAiClientInner {
    client: reqwest::Client,
    model: String,
}

impl OpenAiClient {
    /// Create a new OpenAI client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key contains invalid header characters
    /// or the HTTP client cannot be built.
    pub fn new(config: &OpenAiConfig) -> Result<Self, OpenAiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = format!("Bearer {}", config.api_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| OpenAiError::Parse(format!("Invalid API key for header: {e}")))?,
        );

        // Connect fast or fail, but no total timeout: the response body
        // streams for as long as the model is talking.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            inner: Arc::new(OpenAiClientInner {
                client,
                model: config.model.clone(),
            }),
        })
    }

    /// Stream a completion for the given transcript.
    ///
    /// The sales system prompt is prepended before the transcript, so
    /// callers pass only what the visitor and assistant have said.
    /// Returns a stream of text deltas.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial request fails.
    #[instrument(skip(self, messages), fields(model = %self.inner.model, message_count = messages.len()))]
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<impl Stream<Item = Result<String, OpenAiError>> + use<>, OpenAiError> {
        let mut transcript = Vec::with_capacity(messages.len() + 1);
        transcript.push(ChatMessage {
            role: ChatRole::System,
            content: SYSTEM_PROMPT.to_string(),
        });
        transcript.extend(messages);

        let request = CompletionRequest {
            model: &self.inner.model,
            messages: &transcript,
            stream: true,
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        let response = self
            .inner
            .client
            .post(OPENAI_API_URL)
            .json(&request)
            .send()
            .await?;

        // Check for error responses before streaming
        let status = response.status();
        if !status.is_success() {
            return Err(handle_error_status(status, response).await);
        }

        // Return a stream that parses SSE events into text deltas
        Ok(stream! {
            use futures::StreamExt;

            let mut buffer = String::new();
            let mut byte_stream = std::pin::pin!(response.bytes_stream());

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let text = match std::str::from_utf8(&chunk) {
                            Ok(t) => t,
                            Err(e) => {
                                yield Err(OpenAiError::Parse(format!("Invalid UTF-8: {e}")));
                                continue;
                            }
                        };

                        buffer.push_str(text);

                        // Process complete SSE events
                        while let Some(event) = extract_sse_event(&mut buffer) {
                            match parse_sse_event(&event) {
                                Some(Ok(Some(delta))) => yield Ok(delta),
                                Some(Ok(None)) => {}
                                Some(Err(e)) => yield Err(e),
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(OpenAiError::Stream(e.to_string()));
                    }
                }
            }
        })
    }
}

/// Map an error status code to an [`OpenAiError`].
async fn handle_error_status(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> OpenAiError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return OpenAiError::RateLimited(retry_after);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return OpenAiError::Unauthorized("Invalid API key".to_string());
    }

    match response.text().await {
        Ok(body) => {
            if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                OpenAiError::Api {
                    error_type: api_error
                        .error
                        .error_type
                        .unwrap_or_else(|| "unknown".to_string()),
                    message: api_error.error.message,
                }
            } else {
                OpenAiError::Api {
                    error_type: "unknown".to_string(),
                    message: body,
                }
            }
        }
        Err(e) => OpenAiError::Http(e),
    }
}

/// Extract a complete SSE event from the buffer.
///
/// Returns `Some(event)` if a complete event was found (and removes it
/// from the buffer), or `None` if no complete event is available yet.
fn extract_sse_event(buffer: &mut String) -> Option<String> {
    // SSE events are separated by double newlines
    buffer.find("\n\n").map(|idx| {
        let event = buffer[..idx].to_string();
        *buffer = buffer[idx + 2..].to_string();
        event
    })
}

/// Parse one SSE event into its text delta.
///
/// `Ok(None)` means a well-formed event with nothing to emit: the
/// `[DONE]` marker, a role announcement, or a finish chunk.
fn parse_sse_event(event: &str) -> Option<Result<Option<String>, OpenAiError>> {
    if event.trim().is_empty() {
        return None;
    }

    let mut data_line = None;
    for line in event.lines() {
        if let Some(stripped) = line.strip_prefix("data: ") {
            data_line = Some(stripped);
        }
    }
    let data = data_line?;

    // The server closes the connection right after this marker
    if data == "[DONE]" {
        return Some(Ok(None));
    }

    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => Some(Ok(chunk.into_content())),
        Err(e) => Some(Err(OpenAiError::Parse(format!(
            "Failed to parse stream chunk: {e}"
        )))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config() -> OpenAiConfig {
        OpenAiConfig {
            api_key: SecretString::from("sk-test-key"),
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn test_extract_sse_event() {
        let mut buffer = "data: {\"choices\":[]}\n\ndata: [DONE]\n\n".to_string();

        let event1 = extract_sse_event(&mut buffer);
        assert!(event1.is_some());
        assert!(event1.unwrap().contains("choices"));

        let event2 = extract_sse_event(&mut buffer);
        assert_eq!(event2.unwrap(), "data: [DONE]");

        assert!(extract_sse_event(&mut buffer).is_none());
    }

    #[test]
    fn test_extract_sse_event_incomplete() {
        let mut buffer = "data: {\"partial".to_string();
        assert!(extract_sse_event(&mut buffer).is_none());
        assert_eq!(buffer, "data: {\"partial");
    }

    #[test]
    fn test_parse_sse_event_delta() {
        let event = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        let delta = parse_sse_event(event).unwrap().unwrap();
        assert_eq!(delta.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_parse_sse_event_done_marker() {
        let delta = parse_sse_event("data: [DONE]").unwrap().unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn test_parse_sse_event_role_announcement_is_silent() {
        let event = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        let delta = parse_sse_event(event).unwrap().unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn test_parse_sse_event_finish_chunk_is_silent() {
        let event = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let delta = parse_sse_event(event).unwrap().unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn test_parse_sse_event_empty() {
        assert!(parse_sse_event("").is_none());
    }

    #[test]
    fn test_parse_sse_event_garbage_is_error() {
        let result = parse_sse_event("data: not json").unwrap();
        assert!(matches!(result, Err(OpenAiError::Parse(_))));
    }

    #[test]
    fn test_completion_request_serializes_wire_shape() {
        let messages = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "instructions".to_string(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: "What is an EIN?".to_string(),
            },
        ];
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            stream: true,
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "What is an EIN?");
    }

    #[test]
    fn test_api_error_response_deserializes() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let parsed: ApiErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "Incorrect API key provided");
        assert_eq!(parsed.error.error_type.as_deref(), Some("invalid_request_error"));
    }

    #[test]
    fn test_client_construction() {
        assert!(OpenAiClient::new(&config()).is_ok());
    }

    #[test]
    fn test_client_is_clone_send_sync() {
        fn assert_clone<T: Clone>() {}
        fn assert_send_sync<T: Send + Sync>() {}
        assert_clone::<OpenAiClient>();
        assert_send_sync::<OpenAiClient>();
    }
}
