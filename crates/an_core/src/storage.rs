use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Chunk;
use crate::{Error, Result};

/// A named partition of a vector store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionHandle {
    pub name: String,
}

impl CollectionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Who computed the vectors of a collection. Fixed by the first upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSource {
    Caller,
    Store,
}

impl EmbeddingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingSource::Caller => "caller",
            EmbeddingSource::Store => "store",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "caller" => Ok(EmbeddingSource::Caller),
            "store" => Ok(EmbeddingSource::Store),
            other => Err(Error::Store(format!("unknown embedding source {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryInput {
    /// Already embedded by the caller with the collection's model.
    Embedding(Vec<f32>),
    /// Embedded by the store with its own model.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub chunk: Chunk,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Collections holding at least one upserted batch.
    ///
    /// A collection that was created but never filled, as left behind by an
    /// interrupted build, is not listed.
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn get_or_create_collection(&self, name: &str) -> Result<CollectionHandle>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert chunks in one operation, returning the ids the store assigned.
    async fn upsert(&self, collection: &CollectionHandle, chunks: &[Chunk]) -> Result<Vec<String>>;

    async fn count(&self, collection: &CollectionHandle) -> Result<usize>;

    /// Top-k similarity search, best match first.
    async fn query(
        &self,
        collection: &CollectionHandle,
        query: &QueryInput,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Checks that a batch uses one embedding path and one dimensionality.
pub fn batch_embedding_source(chunks: &[Chunk]) -> Result<(EmbeddingSource, Option<usize>)> {
    let with_vectors = chunks.iter().filter(|c| c.embedding.is_some()).count();
    if with_vectors == 0 {
        return Ok((EmbeddingSource::Store, None));
    }
    if with_vectors != chunks.len() {
        return Err(Error::Store(format!(
            "batch mixes caller embeddings ({with_vectors}) with store embeddings ({})",
            chunks.len() - with_vectors
        )));
    }
    let dims = chunks[0].embedding.as_ref().map(Vec::len).unwrap_or_default();
    if let Some(bad) = chunks
        .iter()
        .find(|c| c.embedding.as_ref().map(Vec::len) != Some(dims))
    {
        return Err(Error::Store(format!(
            "embedding dimension mismatch: expected {dims}, got {}",
            bad.embedding.as_ref().map(Vec::len).unwrap_or_default()
        )));
    }
    Ok((EmbeddingSource::Caller, Some(dims)))
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scores every candidate against `query` and keeps the best `top_k`.
pub fn rank_by_similarity<'a, I>(query: &[f32], candidates: I, top_k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (&'a str, &'a Chunk, &'a [f32])>,
{
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|(id, chunk, vector)| ScoredChunk {
            id: id.to_string(),
            chunk: chunk.clone(),
            score: cosine_similarity(query, vector),
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}
