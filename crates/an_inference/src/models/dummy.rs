use std::fmt;

use an_core::models::TokenStream;
use an_core::{CompletionModel, CompletionRequest, EmbeddingModel, Result};
use async_trait::async_trait;
use futures::StreamExt;

pub const DUMMY_DIMENSIONS: usize = 64;

/// Offline model for tests and demos.
///
/// Embeddings are normalized character histograms, so equal texts get equal
/// vectors and texts sharing words land close together. Completions echo a
/// fixed reply, or the question when no reply is set.
#[derive(Clone, Default)]
pub struct DummyModel {
    reply: Option<String>,
}

impl fmt::Debug for DummyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DummyModel").finish()
    }
}

impl DummyModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }

    fn answer(&self, request: &CompletionRequest) -> String {
        match &self.reply {
            Some(reply) => reply.clone(),
            None => {
                let passages = request
                    .system
                    .as_deref()
                    .map(|s| s.matches("\n---\n").count() + 1)
                    .unwrap_or(0);
                format!("You asked: {} ({} context passages)", request.prompt, passages)
            }
        }
    }
}

/// Splits text into increments that keep their leading whitespace.
pub(crate) fn increments(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_whitespace() && !current.trim().is_empty() {
            out.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[async_trait]
impl EmbeddingModel for DummyModel {
    fn name(&self) -> &str {
        "Dummy"
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; DUMMY_DIMENSIONS];
        for c in text.to_lowercase().chars().filter(|c| c.is_alphanumeric()) {
            embedding[(c as usize) % DUMMY_DIMENSIONS] += 1.0;
        }
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(embedding)
    }
}

#[async_trait]
impl CompletionModel for DummyModel {
    fn name(&self) -> &str {
        "Dummy"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        Ok(self.answer(request))
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let tokens = increments(&self.answer(request));
        Ok(futures::stream::iter(tokens.into_iter().map(Ok)).boxed())
    }
}
