use std::fmt;
use std::sync::Arc;

use an_core::{
    ChatMessage, CompletionModel, CompletionRequest, Error, Result, Role, ScoredChunk, TokenStream,
};
use futures::{StreamExt, TryStreamExt};

use crate::config::{RagConfig, DEFAULT_TOP_K};
use crate::index::VectorIndex;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a news assistant. Answer the user's question \
using the news excerpts below. Cite the source name when you use an excerpt. If the excerpts \
do not cover the question, say that the indexed news has nothing on it.";

/// Separates grounding passages in the system prompt.
pub const PASSAGE_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Blocking,
    Streaming,
}

/// Reply to one turn, either complete or as ordered increments.
pub enum Answer {
    Text(String),
    Stream(TokenStream),
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Answer::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Answer {
    /// Drains a stream into the full text.
    pub async fn into_text(self) -> Result<String> {
        match self {
            Answer::Text(text) => Ok(text),
            Answer::Stream(stream) => {
                let parts: Vec<String> = stream.try_collect().await?;
                Ok(parts.concat())
            }
        }
    }
}

/// Conversational loop over a ready index. Never writes to the store.
///
/// History belongs to the caller and is passed in on every turn.
#[derive(Clone)]
pub struct ChatEngine {
    index: VectorIndex,
    model: Arc<dyn CompletionModel>,
    top_k: usize,
    history_turns: usize,
    system_prompt: String,
}

impl fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatEngine")
            .field("index", &self.index)
            .field("model", &self.model.name())
            .field("top_k", &self.top_k)
            .field("history_turns", &self.history_turns)
            .finish()
    }
}

impl ChatEngine {
    pub fn new(index: VectorIndex, model: Arc<dyn CompletionModel>) -> Self {
        Self {
            index,
            model,
            top_k: DEFAULT_TOP_K,
            history_turns: 0,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn from_config(index: VectorIndex, model: Arc<dyn CompletionModel>, config: &RagConfig) -> Self {
        Self::new(index, model)
            .with_top_k(config.top_k)
            .with_history_turns(config.query_history_turns)
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Earlier user messages folded into the retrieval query.
    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub async fn ask(
        &self,
        message: &str,
        history: &[ChatMessage],
        mode: ResponseMode,
    ) -> Result<Answer> {
        match mode {
            ResponseMode::Blocking => self.chat(message, history).await.map(Answer::Text),
            ResponseMode::Streaming => self.stream_chat(message, history).await.map(Answer::Stream),
        }
    }

    pub async fn chat(&self, message: &str, history: &[ChatMessage]) -> Result<String> {
        let request = self.prepare(message, history).await?;
        self.model
            .complete(&request)
            .await
            .map_err(Error::into_completion)
    }

    /// Streams the answer. Increments arrive in generation order.
    pub async fn stream_chat(&self, message: &str, history: &[ChatMessage]) -> Result<TokenStream> {
        let request = self.prepare(message, history).await?;
        let stream = self
            .model
            .stream_complete(&request)
            .await
            .map_err(Error::into_completion)?;
        Ok(stream.map(|item| item.map_err(Error::into_completion)).boxed())
    }

    async fn prepare(&self, message: &str, history: &[ChatMessage]) -> Result<CompletionRequest> {
        let query = self.retrieval_query(message, history);
        let hits = self.index.retrieve(&query, self.top_k).await?;
        tracing::debug!(
            "Retrieved {} passages from {}",
            hits.len(),
            self.index.collection_name()
        );

        Ok(CompletionRequest {
            system: Some(format!(
                "{}\n\nNews excerpts:\n{}",
                self.system_prompt,
                render_context(&hits)
            )),
            history: history.to_vec(),
            prompt: message.to_string(),
        })
    }

    fn retrieval_query(&self, message: &str, history: &[ChatMessage]) -> String {
        if self.history_turns == 0 {
            return message.to_string();
        }
        let mut earlier: Vec<&str> = history
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .take(self.history_turns)
            .map(|m| m.content.as_str())
            .collect();
        earlier.reverse();
        earlier.push(message);
        earlier.join("\n")
    }
}

fn render_context(hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return "(no matching articles)".to_string();
    }
    hits.iter()
        .map(|hit| {
            let meta = &hit.chunk.metadata;
            format!(
                "Title: {}\nSource: {}\nURL: {}\nPublished: {}\n\n{}",
                meta.title,
                meta.source,
                meta.url,
                meta.published_at,
                hit.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}
