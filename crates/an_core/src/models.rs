use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::ChatMessage;
use crate::Result;

/// Ordered text increments of a streamed answer. Consumed once.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;

    /// Generate the embedding for a piece of text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Everything a completion backend needs for one turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Grounding context and instructions, sent as the system message.
    pub system: Option<String>,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Flattens the request into the message list sent on the wire.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    async fn stream_complete(&self, request: &CompletionRequest) -> Result<TokenStream>;
}
