use std::path::PathBuf;
use std::sync::Arc;

use an_core::{EmbeddingModel, Error, Result, VectorStore};

use crate::backends::InMemoryStore;

/// Where the vector store lives. Resolved once at startup by [`create_store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientType {
    /// Persistent store in a local directory.
    Local(PathBuf),
    InMemory,
    /// Chroma server reachable over HTTP.
    Http { url: String },
    Cloud { tenant: String, database: String },
}

impl Default for ClientType {
    fn default() -> Self {
        ClientType::Local(PathBuf::from("res/vector_store"))
    }
}

impl ClientType {
    /// Builds the variant named by `kind`, as used on the command line.
    pub fn from_kind(kind: &str, path: PathBuf, url: Option<String>) -> Result<Self> {
        match kind.to_lowercase().as_str() {
            "local" => Ok(ClientType::Local(path)),
            "memory" | "in-memory" | "in_memory" => Ok(ClientType::InMemory),
            "http" => Ok(ClientType::Http {
                url: url.unwrap_or_else(default_http_url),
            }),
            "cloud" => Ok(ClientType::Cloud {
                tenant: String::new(),
                database: String::new(),
            }),
            other => Err(Error::Config(format!("Unknown store type: {}", other))),
        }
    }
}

#[cfg(feature = "chroma")]
fn default_http_url() -> String {
    crate::backends::chroma_url_from_env()
}

#[cfg(not(feature = "chroma"))]
fn default_http_url() -> String {
    "http://localhost:8000".to_string()
}

/// Opens the store described by `client`.
///
/// `embedder` is the store's own model, used for chunks that arrive
/// without vectors and for text queries.
pub async fn create_store(
    client: &ClientType,
    embedder: Option<Arc<dyn EmbeddingModel>>,
) -> Result<Arc<dyn VectorStore>> {
    tracing::debug!("Creating vector store for {:?}", client);
    match client {
        ClientType::InMemory => Ok(Arc::new(InMemoryStore::new(embedder))),
        ClientType::Local(path) => open_local(path, embedder).await,
        ClientType::Http { url } => open_http(url, embedder),
        ClientType::Cloud { .. } => Err(Error::Config(
            "Cloud vector store is not supported".to_string(),
        )),
    }
}

#[cfg(feature = "sqlite")]
async fn open_local(
    path: &std::path::Path,
    embedder: Option<Arc<dyn EmbeddingModel>>,
) -> Result<Arc<dyn VectorStore>> {
    Ok(Arc::new(crate::backends::SqliteStore::open(path, embedder).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_local(
    _path: &std::path::Path,
    _embedder: Option<Arc<dyn EmbeddingModel>>,
) -> Result<Arc<dyn VectorStore>> {
    Err(Error::Config(
        "Local store requires the `sqlite` feature".to_string(),
    ))
}

#[cfg(feature = "chroma")]
fn open_http(url: &str, embedder: Option<Arc<dyn EmbeddingModel>>) -> Result<Arc<dyn VectorStore>> {
    Ok(Arc::new(crate::backends::ChromaStore::new(url, embedder)?))
}

#[cfg(not(feature = "chroma"))]
fn open_http(_url: &str, _embedder: Option<Arc<dyn EmbeddingModel>>) -> Result<Arc<dyn VectorStore>> {
    Err(Error::Config(
        "HTTP store requires the `chroma` feature".to_string(),
    ))
}
