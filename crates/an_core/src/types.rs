use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layout used for chunk metadata and provider date filters.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Business,
    Entertainment,
    General,
    Health,
    Science,
    Sports,
    Technology,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No member {0:?} in Category")]
pub struct ParseCategoryError(pub String);

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Business,
        Category::Entertainment,
        Category::General,
        Category::Health,
        Category::Science,
        Category::Sports,
        Category::Technology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Business => "business",
            Category::Entertainment => "entertainment",
            Category::General => "general",
            Category::Health => "health",
            Category::Science => "science",
            Category::Sports => "sports",
            Category::Technology => "technology",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_uppercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().to_uppercase() == wanted)
            .ok_or_else(|| ParseCategoryError(s.to_string()))
    }
}

impl PartialEq<str> for Category {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Category {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A news outlet as listed by the provider.
///
/// Two sources are the same entity when their names match, whatever their ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Option<String>,
    pub name: String,
    pub url: Option<String>,
    pub category: Option<Category>,
    pub description: Option<String>,
    pub country: Option<String>,
    language: String,
}

impl Source {
    pub fn new(id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: None,
            category: None,
            description: None,
            country: None,
            language: "en".to_string(),
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_lowercase();
        self
    }

    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country.map(|c| c.to_lowercase());
        self
    }

    pub fn with_details(mut self, url: Option<String>, description: Option<String>) -> Self {
        self.url = url;
        self.description = description;
        self
    }

    /// Lowercase ISO-639-1 code.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Comma-joined ids in input order, or `None` when there is nothing to join.
    pub fn id_list(sources: Option<&[Source]>) -> Option<String> {
        let ids: Vec<&str> = sources?
            .iter()
            .filter_map(|s| s.id.as_deref())
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(ids.join(","))
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Source {}

impl Hash for Source {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialEq<str> for Source {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

impl PartialEq<&str> for Source {
    fn eq(&self, other: &&str) -> bool {
        self.name == *other
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub author: Option<String>,
    pub content: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source: Source,
    pub url: String,
    pub image_url: Option<String>,
}

/// Provenance copied onto every chunk of an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub author: Option<String>,
    pub source: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: String,
    pub image_url: Option<String>,
}

impl ChunkMetadata {
    pub fn from_article(article: &NewsArticle) -> Self {
        Self {
            title: article.title.clone(),
            author: article.author.clone(),
            source: article.source.name.clone(),
            description: article.description.clone(),
            url: article.url.clone(),
            published_at: article.published_at.format(TIMESTAMP_FORMAT).to_string(),
            image_url: article.image_url.clone(),
        }
    }

    /// `key: value` pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, &str); 7] {
        [
            ("title", self.title.as_str()),
            ("author", self.author.as_deref().unwrap_or_default()),
            ("source", self.source.as_str()),
            ("description", self.description.as_deref().unwrap_or_default()),
            ("url", self.url.as_str()),
            ("published_at", self.published_at.as_str()),
            ("image_url", self.image_url.as_deref().unwrap_or_default()),
        ]
    }
}

/// A bounded slice of article text, the unit persisted in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
    /// Position of the parent article in the provider response.
    pub article_index: usize,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata, article_index: usize) -> Self {
        Self {
            text: text.into(),
            metadata,
            embedding: None,
            article_index,
        }
    }

    /// Text that gets embedded: metadata lines, a blank line, then the chunk text.
    ///
    /// Every embedding of a chunk, whether computed by the caller or by the
    /// store, goes through this serialization.
    pub fn embedding_text(&self) -> String {
        let mut out = String::with_capacity(self.text.len() + 256);
        for (key, value) in self.metadata.entries() {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.text);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}
