//! Build-or-load of a topic collection.
//!
//! The manager checks the store before doing any work: a populated
//! collection is loaded as is, and only an absent one triggers the
//! fetch, chunk and bulk-build pipeline. A build either lands every chunk in
//! one upsert or leaves no collection behind.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use an_core::logging::Logger;
use an_core::{
    CancelSignal, Chunk, CollectionHandle, EmbeddingModel, Error, QueryInput, Result, ScoredChunk,
    VectorStore,
};
use an_news::{NewsClient, SearchQuery};

use crate::chunker::Chunker;
use crate::config::RagConfig;
use crate::splitter::{Splitter, SplitterConfig};

/// NewsAPI accepts at most this many source ids per request.
pub const MAX_SOURCES: usize = 20;

/// A queryable collection.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    collection: CollectionHandle,
    embedder: Option<Arc<dyn EmbeddingModel>>,
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("store", &self.store.name())
            .field("collection", &self.collection.name)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl VectorIndex {
    /// Binds to a collection that is already populated.
    pub async fn from_store(
        store: Arc<dyn VectorStore>,
        name: &str,
        embedder: Option<Arc<dyn EmbeddingModel>>,
    ) -> Result<Self> {
        let collection = store.get_or_create_collection(name).await?;
        Ok(Self {
            store,
            collection,
            embedder,
        })
    }

    /// Creates `name` and inserts every chunk in a single upsert.
    ///
    /// The collection is deleted again when the upsert fails, so a failed
    /// build is never mistaken for a finished one.
    pub async fn build_from_chunks(
        store: Arc<dyn VectorStore>,
        name: &str,
        chunks: Vec<Chunk>,
        embedder: Option<Arc<dyn EmbeddingModel>>,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::Store(format!("no chunks to index for {:?}", name)));
        }

        let collection = store.get_or_create_collection(name).await?;
        match store.upsert(&collection, &chunks).await {
            Ok(ids) => {
                tracing::debug!("Inserted {} chunks into {}", ids.len(), name);
                Ok(Self {
                    store,
                    collection,
                    embedder,
                })
            }
            Err(e) => {
                if let Err(cleanup) = store.delete_collection(name).await {
                    tracing::error!("Could not roll back collection {}: {}", name, cleanup);
                }
                Err(e)
            }
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection.name
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.count(&self.collection).await
    }

    /// Top-k chunks for `query`, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let input = match &self.embedder {
            Some(model) => QueryInput::Embedding(
                model
                    .embed_text(query)
                    .await
                    .map_err(Error::into_retrieval)?,
            ),
            None => QueryInput::Text(query.to_string()),
        };
        self.store
            .query(&self.collection, &input, top_k)
            .await
            .map_err(Error::into_retrieval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Unknown,
    Exists,
    Absent,
    Building,
    Ready,
}

/// Sole writer of topic collections.
pub struct IndexManager {
    config: RagConfig,
    news: NewsClient,
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    splitter_model: Option<Arc<dyn EmbeddingModel>>,
    cancel: CancelSignal,
    states: Mutex<HashMap<String, IndexState>>,
}

impl IndexManager {
    pub fn new(config: RagConfig, news: NewsClient, store: Arc<dyn VectorStore>) -> Self {
        let cancel = news.cancel_signal().clone();
        let news = news.with_workers(config.workers);
        Self {
            config,
            news,
            store,
            embedder: None,
            splitter_model: None,
            cancel,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Embed chunks and queries with `embedder` instead of the store's model.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Model used by the semantic splitter.
    pub fn with_splitter_model(mut self, model: Arc<dyn EmbeddingModel>) -> Self {
        self.splitter_model = Some(model);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.news = self.news.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn state(&self, collection_name: &str) -> Option<IndexState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(collection_name).copied())
    }

    fn set_state(&self, logger: &Logger, collection_name: &str, state: IndexState) {
        logger.info(&format!("state -> {:?}", state));
        if let Ok(mut states) = self.states.lock() {
            states.insert(collection_name.to_string(), state);
        }
    }

    /// Index for the configured topic and collection.
    pub async fn get_or_create_default(&self) -> Result<VectorIndex> {
        let splitter = self.config.splitter();
        self.get_or_create_index(&self.config.topic, &self.config.collection_name, &splitter)
            .await
    }

    /// Loads `collection_name` when the store has it, builds it otherwise.
    pub async fn get_or_create_index(
        &self,
        topic: &str,
        collection_name: &str,
        splitter: &SplitterConfig,
    ) -> Result<VectorIndex> {
        let logger = Logger::new().with_new_prefixes(format!("[index:{}]", collection_name));
        self.set_state(&logger, collection_name, IndexState::Unknown);

        let collections = self.store.list_collections().await?;
        if collections.iter().any(|c| c == collection_name) {
            self.set_state(&logger, collection_name, IndexState::Exists);
            logger.info("📦 Collection found, loading from store");
            let index =
                VectorIndex::from_store(self.store.clone(), collection_name, self.embedder.clone())
                    .await?;
            self.set_state(&logger, collection_name, IndexState::Ready);
            return Ok(index);
        }

        self.set_state(&logger, collection_name, IndexState::Absent);
        logger.info(&format!("🏗️ Building collection for topic {:?}", topic));
        self.set_state(&logger, collection_name, IndexState::Building);

        match self.build(&logger, topic, collection_name, splitter).await {
            Ok(index) => {
                self.set_state(&logger, collection_name, IndexState::Ready);
                logger.info("✅ Index ready");
                Ok(index)
            }
            Err(e) => {
                self.set_state(&logger, collection_name, IndexState::Absent);
                logger.error(&format!("❌ Build failed: {}", e));
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        logger: &Logger,
        topic: &str,
        collection_name: &str,
        splitter: &SplitterConfig,
    ) -> Result<VectorIndex> {
        let splitter = Splitter::from_config(*splitter, self.splitter_model.clone())?;
        self.cancel.check()?;

        let mut sources = self
            .news
            .list_sources(
                self.config.category,
                &self.config.language,
                self.config.country.as_deref(),
            )
            .await?;
        if sources.len() > MAX_SOURCES {
            logger.debug(&format!(
                "Keeping the first {} of {} sources",
                MAX_SOURCES,
                sources.len()
            ));
            sources.truncate(MAX_SOURCES);
        }

        let query = SearchQuery {
            sources: Some(sources),
            language: self.config.language.clone(),
            page_size: self.config.page_size,
            ..SearchQuery::new(topic)
        };
        let articles = self.news.get_articles(&query).await?;
        if articles.cancelled {
            logger.warn("Cancelled while fetching articles, discarding partial results");
            return Err(Error::Cancelled);
        }
        let articles = articles.values();
        logger.info(&format!("📰 {} articles to chunk", articles.len()));

        let chunker = Chunker::new(splitter)
            .with_embedder(self.embedder.clone())
            .with_pool(self.config.workers, self.cancel.clone());
        let batch = chunker.chunk_batch(articles).await;
        if batch.cancelled {
            logger.warn("Cancelled while chunking, discarding partial results");
            return Err(Error::Cancelled);
        }
        if !batch.failures.is_empty() {
            logger.warn(&format!(
                "{} articles could not be chunked",
                batch.failures.len()
            ));
        }
        self.cancel.check()?;

        logger.info(&format!("🧩 Inserting {} chunks", batch.chunks.len()));
        VectorIndex::build_from_chunks(
            self.store.clone(),
            collection_name,
            batch.chunks,
            self.embedder.clone(),
        )
        .await
    }
}
