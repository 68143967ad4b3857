use std::sync::Arc;

use an_core::{
    CancelSignal, Chunk, ChunkMetadata, EmbeddingModel, Error, NewsArticle, Result, TaskPool,
};

use crate::splitter::{SentenceSplitter, Splitter};

fn is_blank(article: &NewsArticle) -> bool {
    article.content.trim().is_empty()
}

/// Lazily cuts an article into sentence-aware chunks.
///
/// Every chunk carries a full copy of the article metadata and the chunks
/// tile the content exactly. A blank article yields no chunks.
pub fn chunk(
    article: &NewsArticle,
    article_index: usize,
    max_chunk_size: usize,
) -> impl Iterator<Item = Chunk> + '_ {
    let metadata = ChunkMetadata::from_article(article);
    let blank = is_blank(article);
    SentenceSplitter::new(max_chunk_size)
        .split(&article.content)
        .filter(move |_| !blank)
        .map(move |piece| Chunk::new(piece, metadata.clone(), article_index))
}

/// Attaches an embedding computed over the metadata-augmented chunk text.
pub async fn embed(mut chunk: Chunk, model: &dyn EmbeddingModel) -> Result<Chunk> {
    let vector = model
        .embed_text(&chunk.embedding_text())
        .await
        .map_err(|e| match e {
            Error::Embedding(_) => e,
            other => Error::Embedding(other.to_string()),
        })?;
    chunk.embedding = Some(vector);
    Ok(chunk)
}

/// Result of chunking a batch of articles.
#[derive(Debug, Default)]
pub struct ChunkBatch {
    /// Chunks ordered by article index.
    pub chunks: Vec<Chunk>,
    /// Articles whose chunk or embed step failed, by article index.
    pub failures: Vec<(usize, Error)>,
    pub cancelled: bool,
}

/// Splits and optionally embeds articles on a bounded pool.
#[derive(Clone)]
pub struct Chunker {
    splitter: Splitter,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    pool: TaskPool,
}

impl Chunker {
    pub fn new(splitter: Splitter) -> Self {
        Self {
            splitter,
            embedder: None,
            pool: TaskPool::default(),
        }
    }

    /// Embed chunks here instead of leaving it to the store.
    pub fn with_embedder(mut self, embedder: Option<Arc<dyn EmbeddingModel>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_pool(mut self, workers: usize, cancel: CancelSignal) -> Self {
        self.pool = TaskPool::new(workers).with_cancel(cancel);
        self
    }

    pub async fn chunk_article(&self, article: &NewsArticle, index: usize) -> Result<Vec<Chunk>> {
        if is_blank(article) {
            return Ok(Vec::new());
        }
        let metadata = ChunkMetadata::from_article(article);
        let pieces = self.splitter.split(&article.content).await?;
        let mut chunks = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let chunk = Chunk::new(piece, metadata.clone(), index);
            chunks.push(match self.embedder.as_deref() {
                Some(model) => embed(chunk, model).await?,
                None => chunk,
            });
        }
        Ok(chunks)
    }

    /// Chunks every article; one failing article never fails the batch.
    pub async fn chunk_batch(&self, articles: Vec<NewsArticle>) -> ChunkBatch {
        let chunker = self.clone();
        let outcome = self
            .pool
            .run(articles, move |index, article| {
                let chunker = chunker.clone();
                async move { chunker.chunk_article(&article, index).await }
            })
            .await;

        for (index, e) in &outcome.failures {
            tracing::warn!("⚠️ Chunking article {} failed: {}", index, e);
        }
        let cancelled = outcome.cancelled;
        let failures = outcome.failures;
        let chunks: Vec<Chunk> = outcome
            .completed
            .into_iter()
            .flat_map(|(_, chunks)| chunks)
            .collect();
        tracing::debug!("{} chunks, {} failed articles", chunks.len(), failures.len());

        ChunkBatch {
            chunks,
            failures,
            cancelled,
        }
    }
}
