//! Sales assistant chat route.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::Value;
use tracing::{error, instrument};

use crate::admission::{self, EndpointClass, sanitize, validation};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Stream an assistant reply for the widget's transcript.
///
/// POST /api/chat
///
/// The reply is plain text written to the wire as the model generates
/// it. A provider failure after streaming begins can only truncate the
/// response; the status code is already on the wire.
#[instrument(skip(state, headers, body))]
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    admission::check(&state, &headers, EndpointClass::Chat).await?;

    let Some(openai) = state.openai() else {
        return Err(ApiError::ServiceUnavailable);
    };

    let payload: Value = serde_json::from_str(&body)
        .map_err(|_| validation::ValidationError::single("body", "must be valid JSON"))?;
    let mut request = validation::chat_messages(&payload)?;
    for message in &mut request.messages {
        message.content = sanitize::sanitize_string(&message.content);
    }

    let deltas = openai.chat_stream(request.messages).await?;
    let stream = deltas.inspect(|delta| {
        if let Err(e) = delta {
            error!("Chat stream failed mid-response: {e}");
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}
