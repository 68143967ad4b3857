use std::collections::BTreeMap;
use std::sync::Arc;

use an_core::storage::rank_by_similarity;
use an_core::{
    Chunk, CollectionHandle, EmbeddingModel, QueryInput, Result, ScoredChunk, VectorStore,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::layout::{missing_collection, CollectionLayout, StoreEmbedder};

struct Entry {
    id: String,
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Collection {
    layout: Option<CollectionLayout>,
    entries: Vec<Entry>,
}

/// Process-local store; everything is lost when it is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    embedder: StoreEmbedder,
}

impl InMemoryStore {
    pub fn new(embedder: Option<Arc<dyn EmbeddingModel>>) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            embedder: StoreEmbedder::new(embedder),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.layout.is_some())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn get_or_create_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(CollectionHandle::new(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &CollectionHandle, chunks: &[Chunk]) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let (layout, vectors) = self.embedder.vectors_for(chunks).await?;

        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(&collection.name)
            .ok_or_else(|| missing_collection(&collection.name))?;
        target.layout = Some(CollectionLayout::merge(target.layout, layout, &collection.name)?);

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let id = Uuid::new_v4().to_string();
            target.entries.push(Entry {
                id: id.clone(),
                chunk: Chunk {
                    embedding: None,
                    ..chunk.clone()
                },
                vector,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        self.collections
            .read()
            .await
            .get(&collection.name)
            .map(|c| c.entries.len())
            .ok_or_else(|| missing_collection(&collection.name))
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        query: &QueryInput,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let layout = {
            let collections = self.collections.read().await;
            let target = collections
                .get(&collection.name)
                .ok_or_else(|| missing_collection(&collection.name))?;
            match target.layout {
                Some(layout) => layout,
                None => return Ok(Vec::new()),
            }
        };
        let vector = self.embedder.query_vector(layout, query).await?;

        let collections = self.collections.read().await;
        let target = collections
            .get(&collection.name)
            .ok_or_else(|| missing_collection(&collection.name))?;
        Ok(rank_by_similarity(
            &vector,
            target
                .entries
                .iter()
                .map(|e| (e.id.as_str(), &e.chunk, e.vector.as_slice())),
            top_k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::test_support::{chunk, KeywordEmbedder};
    use an_core::Error;

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = InMemoryStore::default();
        assert!(store.list_collections().await.unwrap().is_empty());

        let handle = store.get_or_create_collection("artificial_intelligence").await.unwrap();
        store.get_or_create_collection("artificial_intelligence").await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
        assert_eq!(store.count(&handle).await.unwrap(), 0);

        let ids = store
            .upsert(&handle, &[chunk("a", Some(vec![1.0, 0.0])), chunk("b", Some(vec![0.0, 1.0]))])
            .await
            .unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["artificial_intelligence"]);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(store.count(&handle).await.unwrap(), 2);

        store.delete_collection("artificial_intelligence").await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
        assert!(store.count(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_query_with_caller_vectors() {
        let store = InMemoryStore::default();
        let handle = store.get_or_create_collection("c").await.unwrap();
        store
            .upsert(
                &handle,
                &[
                    chunk("east", Some(vec![1.0, 0.0])),
                    chunk("north", Some(vec![0.0, 1.0])),
                    chunk("north-east", Some(vec![1.0, 1.0])),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .query(&handle, &QueryInput::Embedding(vec![0.9, 0.1]), 2)
            .await
            .unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north-east"]);
        assert_eq!(hits[0].chunk.article_index, 3);
        assert!(hits[0].chunk.embedding.is_none());
    }

    #[tokio::test]
    async fn test_store_side_embeddings() {
        let store = InMemoryStore::new(Some(Arc::new(KeywordEmbedder)));
        let handle = store.get_or_create_collection("c").await.unwrap();
        store
            .upsert(
                &handle,
                &[chunk("chips chips chips", None), chunk("football tonight", None)],
            )
            .await
            .unwrap();

        let hits = store
            .query(&handle, &QueryInput::Text("football".to_string()), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.text, "football tonight");
    }

    #[tokio::test]
    async fn test_mixing_embedding_paths_is_rejected() {
        let store = InMemoryStore::new(Some(Arc::new(KeywordEmbedder)));
        let handle = store.get_or_create_collection("c").await.unwrap();
        store.upsert(&handle, &[chunk("chips", None)]).await.unwrap();

        let err = store
            .upsert(&handle, &[chunk("chips", Some(vec![1.0, 0.0, 0.0]))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.count(&handle).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_into_missing_collection() {
        let store = InMemoryStore::default();
        let err = store
            .upsert(&CollectionHandle::new("nope"), &[chunk("a", Some(vec![1.0]))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_query_empty_collection() {
        let store = InMemoryStore::default();
        let handle = store.get_or_create_collection("c").await.unwrap();
        let hits = store
            .query(&handle, &QueryInput::Embedding(vec![1.0]), 2)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
