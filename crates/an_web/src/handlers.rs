use std::convert::Infallible;

use an_core::{ChatMessage, Error};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Earlier turns, oldest first. The server keeps no session state.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl ChatRequest {
    fn validate(&self) -> Result<&str, AppError> {
        let message = self.message.trim();
        if message.is_empty() {
            return Err(Error::InvalidArgument("message must not be empty".to_string()).into());
        }
        Ok(message)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub collection: String,
    pub model: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        collection: state.engine.index().collection_name().to_string(),
        model: state.engine.model_name().to_string(),
    })
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let message = request.validate()?;
    let answer = state.engine.chat(message, &request.history).await?;
    Ok(Json(ChatResponse { answer }))
}

/// One `token` event per increment, then a `done` event.
///
/// A failure after the stream started is sent as an `error` event carrying
/// the user-facing message, and ends the stream without a `done` event.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let message = request.validate()?;
    let tokens = state.engine.stream_chat(message, &request.history).await?;

    // `None` marks the end of the answer and becomes the `done` event.
    let events = tokens
        .map(Some)
        .chain(stream::once(async { None }))
        .scan(false, |failed, item| {
            if *failed {
                return futures::future::ready(None);
            }
            let event = match item {
                // SSE cannot carry carriage returns.
                Some(Ok(text)) => Event::default().event("token").data(text.replace('\r', "")),
                Some(Err(e)) => {
                    tracing::error!("Stream failed: {}", e);
                    *failed = true;
                    Event::default().event("error").data(e.user_message())
                }
                None => Event::default().event("done").data("[DONE]"),
            };
            futures::future::ready(Some(event))
        })
        .map(Ok::<Event, Infallible>);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
