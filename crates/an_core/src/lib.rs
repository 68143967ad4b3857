pub mod error;
pub mod logging;
pub mod models;
pub mod news;
pub mod pool;
pub mod storage;
pub mod types;

pub use error::{Error, Result};
pub use models::{CompletionModel, CompletionRequest, EmbeddingModel, TokenStream};
pub use news::{Extractor, NewsProvider};
pub use pool::{BatchOutcome, CancelSignal, TaskPool};
pub use storage::{CollectionHandle, QueryInput, ScoredChunk, VectorStore};
pub use types::{Category, ChatMessage, Chunk, ChunkMetadata, NewsArticle, Role, Source};
