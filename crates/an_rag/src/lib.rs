pub mod cache;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod index;
pub mod splitter;

pub use cache::{EngineCache, EngineKey};
pub use chunker::{ChunkBatch, Chunker};
pub use config::RagConfig;
pub use engine::{Answer, ChatEngine, ResponseMode};
pub use index::{IndexManager, IndexState, VectorIndex};
pub use splitter::{SemanticSplitter, SentenceSplitter, Splitter, SplitterConfig};

pub mod prelude {
    pub use super::{
        Answer, ChatEngine, EngineCache, EngineKey, IndexManager, RagConfig, ResponseMode,
        SplitterConfig, VectorIndex,
    };
    pub use an_core::{ChatMessage, Error, Result};
}
