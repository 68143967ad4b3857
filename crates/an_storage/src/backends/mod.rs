pub mod memory;

#[cfg(feature = "chroma")]
pub mod chroma;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;

#[cfg(feature = "chroma")]
pub use chroma::{chroma_url_from_env, ChromaStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
