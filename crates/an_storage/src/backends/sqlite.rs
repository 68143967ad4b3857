use std::path::{Path, PathBuf};
use std::sync::Arc;

use an_core::storage::{rank_by_similarity, EmbeddingSource};
use an_core::{
    Chunk, ChunkMetadata, CollectionHandle, EmbeddingModel, Error, QueryInput, Result,
    ScoredChunk, VectorStore,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::layout::{missing_collection, CollectionLayout, StoreEmbedder};

const DB_FILE: &str = "index.sqlite3";

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY,
        embedding_source TEXT,
        dims INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB NOT NULL,
        article_index INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection)",
];

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::Store(format!("{}: {}", context, e))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Persistent store in a single SQLite file under a local directory.
///
/// Search is a brute-force cosine scan over the collection.
pub struct SqliteStore {
    pool: SqlitePool,
    db_path: PathBuf,
    embedder: StoreEmbedder,
}

impl SqliteStore {
    pub async fn open(dir: &Path, embedder: Option<Arc<dyn EmbeddingModel>>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_error("Failed to open database"))?;

        for migration in MIGRATIONS {
            sqlx::query(migration)
                .execute(&pool)
                .await
                .map_err(db_error("Failed to run migration"))?;
        }
        tracing::debug!("Opened vector store at {}", db_path.display());

        Ok(Self {
            pool,
            db_path,
            embedder: StoreEmbedder::new(embedder),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// `None` when the collection does not exist, `Some(None)` when it is empty.
    async fn layout(&self, name: &str) -> Result<Option<Option<CollectionLayout>>> {
        let row = sqlx::query("SELECT embedding_source, dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to read collection"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let source: Option<String> = row.try_get("embedding_source").map_err(db_error("Bad row"))?;
        let dims: Option<i64> = row.try_get("dims").map_err(db_error("Bad row"))?;
        Ok(Some(match (source, dims) {
            (Some(source), Some(dims)) => Some(CollectionLayout {
                source: EmbeddingSource::parse(&source)?,
                dims: dims as usize,
            }),
            _ => None,
        }))
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM collections WHERE embedding_source IS NOT NULL ORDER BY name",
        )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list collections"))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(db_error("Bad row")))
            .collect()
    }

    async fn get_or_create_collection(&self, name: &str) -> Result<CollectionHandle> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to create collection"))?;
        Ok(CollectionHandle::new(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin"))?;
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete chunks"))?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete collection"))?;
        tx.commit().await.map_err(db_error("Failed to commit"))?;
        Ok(())
    }

    async fn upsert(&self, collection: &CollectionHandle, chunks: &[Chunk]) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let existing = self
            .layout(&collection.name)
            .await?
            .ok_or_else(|| missing_collection(&collection.name))?;
        let (incoming, vectors) = self.embedder.vectors_for(chunks).await?;
        let layout = CollectionLayout::merge(existing, incoming, &collection.name)?;

        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin"))?;
        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO chunks (id, collection, text, metadata, embedding, article_index)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&collection.name)
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(encode_vector(vector))
            .bind(chunk.article_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert chunk"))?;
            ids.push(id);
        }
        sqlx::query("UPDATE collections SET embedding_source = ?, dims = ? WHERE name = ?")
            .bind(layout.source.as_str())
            .bind(layout.dims as i64)
            .bind(&collection.name)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to update collection"))?;
        tx.commit().await.map_err(db_error("Failed to commit"))?;

        Ok(ids)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        if self.layout(&collection.name).await?.is_none() {
            return Err(missing_collection(&collection.name));
        }
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE collection = ?")
            .bind(&collection.name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count chunks"))?;
        let n: i64 = row.try_get("n").map_err(db_error("Bad row"))?;
        Ok(n as usize)
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        query: &QueryInput,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let layout = match self
            .layout(&collection.name)
            .await?
            .ok_or_else(|| missing_collection(&collection.name))?
        {
            Some(layout) => layout,
            None => return Ok(Vec::new()),
        };
        let vector = self.embedder.query_vector(layout, query).await?;

        let rows = sqlx::query(
            "SELECT id, text, metadata, embedding, article_index FROM chunks WHERE collection = ?",
        )
        .bind(&collection.name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to scan chunks"))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(db_error("Bad row"))?;
            let text: String = row.try_get("text").map_err(db_error("Bad row"))?;
            let metadata: String = row.try_get("metadata").map_err(db_error("Bad row"))?;
            let embedding: Vec<u8> = row.try_get("embedding").map_err(db_error("Bad row"))?;
            let article_index: i64 = row.try_get("article_index").map_err(db_error("Bad row"))?;
            let metadata: ChunkMetadata = serde_json::from_str(&metadata)?;
            candidates.push((
                id,
                Chunk::new(text, metadata, article_index as usize),
                decode_vector(&embedding),
            ));
        }

        Ok(rank_by_similarity(
            &vector,
            candidates
                .iter()
                .map(|(id, chunk, v)| (id.as_str(), chunk, v.as_slice())),
            top_k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::test_support::{chunk, KeywordEmbedder};
    use tempfile::tempdir;

    #[test]
    fn test_vector_blob_encoding() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[tokio::test]
    async fn test_collections_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store");

        {
            let store = SqliteStore::open(&path, None).await.unwrap();
            let handle = store.get_or_create_collection("artificial_intelligence").await.unwrap();
            store
                .upsert(&handle, &[chunk("east", Some(vec![1.0, 0.0])), chunk("north", Some(vec![0.0, 1.0]))])
                .await
                .unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::open(&path, None).await.unwrap();
        assert!(store.db_path().ends_with(DB_FILE));
        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["artificial_intelligence".to_string()]
        );
        let handle = CollectionHandle::new("artificial_intelligence");
        assert_eq!(store.count(&handle).await.unwrap(), 2);

        let hits = store
            .query(&handle, &QueryInput::Embedding(vec![0.0, 2.0]), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.text, "north");
        assert_eq!(hits[0].chunk.metadata.source, "Wired");
        assert_eq!(hits[0].chunk.article_index, 3);
    }

    #[tokio::test]
    async fn test_unfilled_collection_is_not_listed_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path(), None).await.unwrap();
            store.get_or_create_collection("half_built").await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::open(dir.path(), None).await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());

        let handle = store.get_or_create_collection("half_built").await.unwrap();
        assert_eq!(store.count(&handle).await.unwrap(), 0);
        store.upsert(&handle, &[chunk("a", Some(vec![1.0]))]).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["half_built".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_collection_removes_chunks() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path(), None).await.unwrap();
        let handle = store.get_or_create_collection("c").await.unwrap();
        store.upsert(&handle, &[chunk("a", Some(vec![1.0]))]).await.unwrap();

        store.delete_collection("c").await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());

        let handle = store.get_or_create_collection("c").await.unwrap();
        assert_eq!(store.count(&handle).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_embeddings_and_guard() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path(), Some(Arc::new(KeywordEmbedder)))
            .await
            .unwrap();
        let handle = store.get_or_create_collection("c").await.unwrap();
        store
            .upsert(&handle, &[chunk("weather report", None), chunk("chips chips", None)])
            .await
            .unwrap();

        let hits = store
            .query(&handle, &QueryInput::Text("chips".to_string()), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.text, "chips chips");

        let err = store
            .upsert(&handle, &[chunk("x", Some(vec![1.0, 0.0, 0.0]))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.count(&handle).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_requires_existing_collection() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path(), None).await.unwrap();
        let err = store
            .upsert(&CollectionHandle::new("missing"), &[chunk("a", Some(vec![1.0]))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
