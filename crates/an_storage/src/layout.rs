use std::sync::Arc;

use an_core::storage::{batch_embedding_source, EmbeddingSource};
use an_core::{Chunk, EmbeddingModel, Error, QueryInput, Result};

/// How the vectors of one collection were produced. Fixed by the first upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionLayout {
    pub source: EmbeddingSource,
    pub dims: usize,
}

impl CollectionLayout {
    /// Rejects a batch whose layout differs from the collection's.
    pub fn merge(existing: Option<Self>, incoming: Self, collection: &str) -> Result<Self> {
        match existing {
            None => Ok(incoming),
            Some(current) if current.source != incoming.source => Err(Error::Store(format!(
                "collection {collection} holds {} embeddings, refusing {} embeddings",
                current.source.as_str(),
                incoming.source.as_str()
            ))),
            Some(current) if current.dims != incoming.dims => Err(Error::Store(format!(
                "collection {collection} has dimension {}, got {}",
                current.dims, incoming.dims
            ))),
            Some(current) => Ok(current),
        }
    }
}

/// The store's own embedding model, used when the caller supplies no vectors.
#[derive(Clone, Default)]
pub struct StoreEmbedder {
    model: Option<Arc<dyn EmbeddingModel>>,
}

impl StoreEmbedder {
    pub fn new(model: Option<Arc<dyn EmbeddingModel>>) -> Self {
        Self { model }
    }

    fn model(&self) -> Result<&Arc<dyn EmbeddingModel>> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Store("store has no embedding model configured".to_string()))
    }

    /// Vectors for a batch, one per chunk, plus the layout they imply.
    pub async fn vectors_for(&self, chunks: &[Chunk]) -> Result<(CollectionLayout, Vec<Vec<f32>>)> {
        let (source, _) = batch_embedding_source(chunks)?;
        let vectors = match source {
            EmbeddingSource::Caller => chunks
                .iter()
                .map(|c| c.embedding.clone().unwrap_or_default())
                .collect::<Vec<_>>(),
            EmbeddingSource::Store => {
                let model = self.model()?;
                let mut vectors = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    let vector = model
                        .embed_text(&chunk.embedding_text())
                        .await
                        .map_err(|e| Error::Embedding(e.to_string()))?;
                    vectors.push(vector);
                }
                let dims = vectors.first().map(Vec::len).unwrap_or_default();
                if vectors.iter().any(|v| v.len() != dims) {
                    return Err(Error::Embedding(format!(
                        "{} returned vectors of varying length",
                        model.name()
                    )));
                }
                vectors
            }
        };
        let dims = vectors.first().map(Vec::len).unwrap_or_default();
        Ok((CollectionLayout { source, dims }, vectors))
    }

    /// The vector to search with, checked against the collection's layout.
    pub async fn query_vector(&self, layout: CollectionLayout, query: &QueryInput) -> Result<Vec<f32>> {
        let vector = match (layout.source, query) {
            (EmbeddingSource::Caller, QueryInput::Embedding(v)) => v.clone(),
            (EmbeddingSource::Store, QueryInput::Text(text)) => self
                .model()?
                .embed_text(text)
                .await
                .map_err(|e| Error::Embedding(e.to_string()))?,
            (EmbeddingSource::Caller, QueryInput::Text(_)) => {
                return Err(Error::Store(
                    "collection was embedded by the caller, query must carry a vector".to_string(),
                ))
            }
            (EmbeddingSource::Store, QueryInput::Embedding(_)) => {
                return Err(Error::Store(
                    "collection was embedded by the store, query must be text".to_string(),
                ))
            }
        };
        if vector.len() != layout.dims {
            return Err(Error::Store(format!(
                "query has dimension {}, collection has {}",
                vector.len(),
                layout.dims
            )));
        }
        Ok(vector)
    }
}

pub(crate) fn missing_collection(name: &str) -> Error {
    Error::Store(format!("collection {name} does not exist"))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_layout_merge() {
        let caller = CollectionLayout {
            source: EmbeddingSource::Caller,
            dims: 3,
        };
        let store = CollectionLayout {
            source: EmbeddingSource::Store,
            dims: 3,
        };
        assert_eq!(CollectionLayout::merge(None, caller, "c").unwrap(), caller);
        assert_eq!(CollectionLayout::merge(Some(caller), caller, "c").unwrap(), caller);
        assert!(CollectionLayout::merge(Some(caller), store, "c").is_err());
        let wider = CollectionLayout { dims: 4, ..caller };
        assert!(CollectionLayout::merge(Some(caller), wider, "c").is_err());
    }

    #[tokio::test]
    async fn test_store_embeds_metadata_augmented_text() {
        let embedder = StoreEmbedder::new(Some(Arc::new(KeywordEmbedder)));
        let (layout, vectors) = embedder
            .vectors_for(&[chunk("chips chips", None)])
            .await
            .unwrap();
        assert_eq!(layout.source, EmbeddingSource::Store);
        assert_eq!(layout.dims, 3);
        assert!((vectors[0][0] - 2.01).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_store_embedding_requires_model() {
        let err = StoreEmbedder::default()
            .vectors_for(&[chunk("text", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_query_must_follow_collection_path() {
        let embedder = StoreEmbedder::new(Some(Arc::new(KeywordEmbedder)));
        let caller = CollectionLayout {
            source: EmbeddingSource::Caller,
            dims: 2,
        };
        assert!(embedder
            .query_vector(caller, &QueryInput::Text("chips".to_string()))
            .await
            .is_err());
        assert!(embedder
            .query_vector(caller, &QueryInput::Embedding(vec![1.0, 0.0, 0.0]))
            .await
            .is_err());
        assert_eq!(
            embedder
                .query_vector(caller, &QueryInput::Embedding(vec![1.0, 0.0]))
                .await
                .unwrap(),
            vec![1.0, 0.0]
        );
    }
}
