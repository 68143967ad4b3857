use std::fmt;
use std::time::Duration;

use an_core::models::TokenStream;
use an_core::{ChatMessage, CompletionModel, CompletionRequest, EmbeddingModel, Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Token(String),
    Done,
}

/// Splits a server-sent event byte stream into completion increments.
///
/// Network chunks may cut a line (or a UTF-8 sequence) anywhere, so bytes
/// are buffered until a full line is available.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }
            let chunk: StreamChunk = serde_json::from_str(data)
                .map_err(|e| Error::Completion(format!("malformed stream chunk: {}", e)))?;
            if let Some(content) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty())
            {
                events.push(SseEvent::Token(content));
            }
        }
        Ok(events)
    }
}

/// Chat completions and embeddings from any OpenAI-compatible endpoint.
pub struct OpenAiModel {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    temperature: Option<f32>,
}

impl fmt::Debug for OpenAiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiModel")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl OpenAiModel {
    pub fn new(config: Config) -> Result<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| Error::Config("OpenAI API key is required".to_string()))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model,
            embedding_model: config.embedding_model,
            temperature: config.temperature,
        })
    }

    fn chat_body<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.chat_model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
            stream,
        }
    }

    async fn post_chat(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let messages = request.messages();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(&messages, stream))
            .send()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Completion(format!("{} returned {}: {}", self.chat_model, status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: text,
                model: &self.embedding_model,
            })
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("{} returned {}: {}", self.embedding_model, status, body)));
        }
        let response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }
}

#[async_trait]
impl CompletionModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response: ChatResponse = self
            .post_chat(request, false)
            .await?
            .json()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Completion("response has no choices".to_string()))
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let response = self.post_chat(request, true).await?;
        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(item) = bytes.next().await {
                let events = match item {
                    Ok(chunk) => decoder.push(&chunk),
                    Err(e) => Err(Error::Completion(e.to_string())),
                };
                match events {
                    Ok(events) => {
                        for event in events {
                            match event {
                                SseEvent::Token(token) => {
                                    if tx.send(Ok(token)).await.is_err() {
                                        return;
                                    }
                                }
                                SseEvent::Done => return,
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            // The body closed without the `[DONE]` marker, so the answer is truncated.
            let _ = tx
                .send(Err(Error::Completion(
                    "stream ended before [DONE]".to_string(),
                )))
                .await;
        });

        Ok(receiver_stream(rx))
    }
}

pub(crate) fn receiver_stream(rx: mpsc::Receiver<Result<String>>) -> TokenStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}
