use std::path::PathBuf;

use an_core::pool::DEFAULT_WORKERS;
use an_core::Category;

use crate::splitter::SplitterConfig;

pub const DEFAULT_TOPIC: &str = "artificial intelligence";
pub const DEFAULT_COLLECTION: &str = "artificial_intelligence";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_STORAGE_PATH: &str = "res/vector_store";
pub const DEFAULT_TOP_K: usize = 2;

/// Options for building and querying a topic index.
#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub topic: String,
    pub collection_name: String,
    pub language: String,
    /// Narrows the sources the articles are searched in.
    pub category: Option<Category>,
    pub country: Option<String>,
    pub use_semantic_splitter: bool,
    /// Upper bound on chunk length, in characters.
    pub max_chunk_size: usize,
    pub storage_path: PathBuf,
    pub top_k: usize,
    pub workers: usize,
    /// How many earlier user turns are folded into the retrieval query.
    pub query_history_turns: usize,
    pub page_size: Option<u32>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            collection_name: DEFAULT_COLLECTION.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            category: None,
            country: None,
            use_semantic_splitter: false,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            top_k: DEFAULT_TOP_K,
            workers: DEFAULT_WORKERS,
            query_history_turns: 0,
            page_size: None,
        }
    }
}

impl RagConfig {
    /// Config for `topic` with the collection name derived from it.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            collection_name: Self::collection_name_for(&topic),
            topic,
            ..Default::default()
        }
    }

    /// Lowercases the topic and collapses every non-alphanumeric run to `_`.
    pub fn collection_name_for(topic: &str) -> String {
        let mut name = String::with_capacity(topic.len());
        for c in topic.trim().chars() {
            if c.is_alphanumeric() {
                name.extend(c.to_lowercase());
            } else if !name.ends_with('_') {
                name.push('_');
            }
        }
        let name = name.trim_matches('_');
        if name.is_empty() {
            "news".to_string()
        } else {
            name.to_string()
        }
    }

    pub fn splitter(&self) -> SplitterConfig {
        SplitterConfig {
            use_semantic: self.use_semantic_splitter,
            max_chunk_size: self.max_chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.topic, "artificial intelligence");
        assert_eq!(config.collection_name, "artificial_intelligence");
        assert_eq!(config.language, "en");
        assert!(!config.use_semantic_splitter);
        assert_eq!(
            RagConfig::collection_name_for(&config.topic),
            config.collection_name
        );
    }

    #[test]
    fn test_collection_name_for() {
        assert_eq!(RagConfig::collection_name_for("Climate Change"), "climate_change");
        assert_eq!(RagConfig::collection_name_for("  AI -- chips! "), "ai_chips");
        assert_eq!(RagConfig::collection_name_for("???"), "news");
        assert_eq!(RagConfig::for_topic("Space X").collection_name, "space_x");
    }
}
