use std::env;
use std::sync::Arc;
use std::time::Duration;

use an_core::storage::EmbeddingSource;
use an_core::{
    Chunk, ChunkMetadata, CollectionHandle, EmbeddingModel, Error, QueryInput, Result,
    ScoredChunk, VectorStore,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::layout::{missing_collection, CollectionLayout, StoreEmbedder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SOURCE_KEY: &str = "an:embedding_source";
const DIMS_KEY: &str = "an:dims";
const INDEX_KEY: &str = "article_index";

/// `http://$CHROMA_HOST:$CHROMA_PORT`, defaulting to `localhost:8000`.
pub fn chroma_url_from_env() -> String {
    let host = env::var("CHROMA_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("CHROMA_PORT").unwrap_or_else(|_| "8000".to_string());
    format!("http://{}:{}", host, port)
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl CollectionInfo {
    fn layout(&self) -> Result<Option<CollectionLayout>> {
        let Some(metadata) = &self.metadata else {
            return Ok(None);
        };
        match (
            metadata.get(SOURCE_KEY).and_then(Value::as_str),
            metadata.get(DIMS_KEY).and_then(Value::as_u64),
        ) {
            (Some(source), Some(dims)) => Ok(Some(CollectionLayout {
                source: EmbeddingSource::parse(source)?,
                dims: dims as usize,
            })),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

/// Client for a Chroma server over its REST API.
///
/// Collections are created in cosine space, so `score = 1 - distance`.
pub struct ChromaStore {
    client: Client,
    base_url: String,
    embedder: StoreEmbedder,
}

impl ChromaStore {
    pub fn new(base_url: impl Into<String>, embedder: Option<Arc<dyn EmbeddingModel>>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            embedder: StoreEmbedder::new(embedder),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn checked(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Store(format!("{}: {} {}", context, status, body)))
    }

    async fn collection(&self, name: &str) -> Result<CollectionInfo> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await?;
        if matches!(response.status(), StatusCode::NOT_FOUND) {
            return Err(missing_collection(name));
        }
        // Older servers answer a missing collection with 500 and a ValueError.
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            let body = response.text().await.unwrap_or_default();
            if body.contains("does not exist") {
                return Err(missing_collection(name));
            }
            return Err(Error::Store(format!("Failed to get collection {}: {}", name, body)));
        }
        Ok(Self::checked(response, "Failed to get collection")
            .await?
            .json()
            .await?)
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self.client.get(self.url("/collections")).send().await?;
        let collections: Vec<CollectionInfo> = Self::checked(response, "Failed to list collections")
            .await?
            .json()
            .await?;
        // The layout is recorded after the first upsert, so unfilled collections have none.
        let mut names = Vec::with_capacity(collections.len());
        for collection in collections {
            if collection.layout()?.is_some() {
                names.push(collection.name);
            }
        }
        Ok(names)
    }

    async fn get_or_create_collection(&self, name: &str) -> Result<CollectionHandle> {
        let response = self
            .client
            .post(self.url("/collections"))
            .json(&json!({
                "name": name,
                "metadata": {"hnsw:space": "cosine"},
                "get_or_create": true,
            }))
            .send()
            .await?;
        let info: CollectionInfo = Self::checked(response, "Failed to create collection")
            .await?
            .json()
            .await?;
        tracing::debug!("Chroma collection {} has id {}", info.name, info.id);
        Ok(CollectionHandle::new(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{}", name)))
            .send()
            .await?;
        Self::checked(response, "Failed to delete collection").await?;
        Ok(())
    }

    async fn upsert(&self, collection: &CollectionHandle, chunks: &[Chunk]) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let info = self.collection(&collection.name).await?;
        let (incoming, vectors) = self.embedder.vectors_for(chunks).await?;
        let layout = CollectionLayout::merge(info.layout()?, incoming, &collection.name)?;

        let ids: Vec<String> = chunks.iter().map(|_| Uuid::new_v4().to_string()).collect();
        let metadatas = chunks
            .iter()
            .map(chunk_metadata)
            .collect::<Result<Vec<_>>>()?;
        let documents: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let response = self
            .client
            .post(self.url(&format!("/collections/{}/upsert", info.id)))
            .json(&json!({
                "ids": ids,
                "embeddings": vectors,
                "metadatas": metadatas,
                "documents": documents,
            }))
            .send()
            .await?;
        Self::checked(response, "Failed to upsert").await?;

        let mut metadata = info.metadata.unwrap_or_default();
        metadata.insert(SOURCE_KEY.to_string(), json!(layout.source.as_str()));
        metadata.insert(DIMS_KEY.to_string(), json!(layout.dims));
        let response = self
            .client
            .put(self.url(&format!("/collections/{}", info.id)))
            .json(&json!({ "new_metadata": metadata }))
            .send()
            .await?;
        Self::checked(response, "Failed to record collection layout").await?;

        Ok(ids)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let info = self.collection(&collection.name).await?;
        let response = self
            .client
            .get(self.url(&format!("/collections/{}/count", info.id)))
            .send()
            .await?;
        Ok(Self::checked(response, "Failed to count").await?.json().await?)
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        query: &QueryInput,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let info = self.collection(&collection.name).await?;
        let Some(layout) = info.layout()? else {
            return Ok(Vec::new());
        };
        let vector = self.embedder.query_vector(layout, query).await?;

        let response = self
            .client
            .post(self.url(&format!("/collections/{}/query", info.id)))
            .json(&json!({
                "query_embeddings": [vector],
                "n_results": top_k,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;
        let result: QueryResponse = Self::checked(response, "Failed to query")
            .await?
            .json()
            .await?;
        scored_chunks(result)
    }
}

fn chunk_metadata(chunk: &Chunk) -> Result<Map<String, Value>> {
    // Chroma rejects null metadata values.
    let mut map = match serde_json::to_value(&chunk.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.retain(|_, v| !v.is_null());
    map.insert(INDEX_KEY.to_string(), json!(chunk.article_index));
    Ok(map)
}

fn read_chunk(text: String, mut metadata: Map<String, Value>) -> Result<Chunk> {
    let article_index = metadata
        .remove(INDEX_KEY)
        .and_then(|v| v.as_u64())
        .unwrap_or_default() as usize;
    let metadata: ChunkMetadata = serde_json::from_value(Value::Object(metadata))?;
    Ok(Chunk::new(text, metadata, article_index))
}

fn scored_chunks(result: QueryResponse) -> Result<Vec<ScoredChunk>> {
    let ids = result.ids.into_iter().next().unwrap_or_default();
    let mut documents = result
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default()
        .into_iter();
    let mut metadatas = result
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default()
        .into_iter();
    let mut distances = result
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default()
        .into_iter();

    let mut scored = Vec::with_capacity(ids.len());
    for id in ids {
        let text = documents.next().flatten().unwrap_or_default();
        let metadata = metadatas.next().flatten().unwrap_or_default();
        let distance = distances.next().unwrap_or(1.0);
        scored.push(ScoredChunk {
            id,
            chunk: read_chunk(text, metadata)?,
            score: 1.0 - distance,
        });
    }
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::test_support::chunk;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collection_json(metadata: Value) -> Value {
        json!({"id": "c-123", "name": "artificial_intelligence", "metadata": metadata})
    }

    #[test]
    fn test_metadata_round_trip_drops_nulls() {
        let original = chunk("body", Some(vec![1.0]));
        let map = chunk_metadata(&original).unwrap();
        assert!(!map.contains_key("description"));
        assert_eq!(map.get(INDEX_KEY), Some(&json!(3)));

        let restored = read_chunk("body".to_string(), map).unwrap();
        assert_eq!(restored.metadata, original.metadata);
        assert_eq!(restored.article_index, 3);
    }

    #[tokio::test]
    async fn test_list_and_create_collections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                collection_json(json!({"an:embedding_source": "caller", "an:dims": 2})),
                {"id": "c-456", "name": "half_built", "metadata": {"hnsw:space": "cosine"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .and(body_partial_json(json!({"name": "artificial_intelligence", "get_or_create": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_json(json!(null))))
            .expect(1)
            .mount(&server)
            .await;

        let store = ChromaStore::new(server.uri(), None).unwrap();
        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["artificial_intelligence".to_string()]
        );
        let handle = store
            .get_or_create_collection("artificial_intelligence")
            .await
            .unwrap();
        assert_eq!(handle.name, "artificial_intelligence");
    }

    #[tokio::test]
    async fn test_query_maps_distances_to_scores() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/collections/artificial_intelligence"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_json(json!({
                "hnsw:space": "cosine",
                "an:embedding_source": "caller",
                "an:dims": 2
            }))))
            .mount(&server)
            .await;
        let metadata = chunk_metadata(&chunk("best", None)).unwrap();
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c-123/query"))
            .and(body_partial_json(json!({"n_results": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ids": [["id-1"]],
                "documents": [["best"]],
                "metadatas": [[metadata]],
                "distances": [[0.25]]
            })))
            .mount(&server)
            .await;

        let store = ChromaStore::new(server.uri(), None).unwrap();
        let hits = store
            .query(
                &CollectionHandle::new("artificial_intelligence"),
                &QueryInput::Embedding(vec![1.0, 0.0]),
                1,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "id-1");
        assert_eq!(hits[0].chunk.text, "best");
        assert!((hits[0].score - 0.75).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_collection_is_store_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/collections/ghost"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string("{\"error\":\"ValueError('Collection ghost does not exist.')\"}"),
            )
            .mount(&server)
            .await;

        let store = ChromaStore::new(server.uri(), None).unwrap();
        let err = store.count(&CollectionHandle::new("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::Store(msg) if msg.contains("does not exist")));
    }
}
