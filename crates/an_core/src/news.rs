use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Status value the provider uses for a successful response.
pub const STATUS_OK: &str = "ok";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSource {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesResponse {
    pub status: String,
    #[serde(default)]
    pub sources: Vec<RawSource>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawArticleSource {
    pub id: Option<String>,
    pub name: String,
}

/// One article record as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub source: RawArticleSource,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(rename = "urlToImage", default)]
    pub url_to_image: Option<String>,
    #[serde(rename = "publishedAt")]
    pub published_at: String,
    /// Short snippet; the provider truncates article bodies.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticlesResponse {
    pub status: String,
    #[serde(rename = "totalResults", default)]
    pub total_results: usize,
    #[serde(default)]
    pub articles: Vec<RawArticle>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceParams {
    pub category: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EverythingParams {
    pub q: Option<String>,
    pub q_in_title: Option<String>,
    pub sources: Option<String>,
    pub domains: Option<String>,
    pub exclude_domains: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlinesParams {
    pub q: Option<String>,
    pub q_in_title: Option<String>,
    pub sources: Option<String>,
    pub category: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Raw access to a news search API. Status checking is left to the caller.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn list_sources(&self, params: &SourceParams) -> Result<SourcesResponse>;

    async fn search_everything(&self, params: &EverythingParams) -> Result<ArticlesResponse>;

    async fn top_headlines(&self, params: &HeadlinesParams) -> Result<ArticlesResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub include_links: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { include_links: true }
    }
}

/// Turns an article URL into clean readable text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Download the raw document, `None` when nothing usable came back.
    async fn fetch(&self, url: &str) -> Result<Option<String>>;

    fn extract(&self, raw: &str, options: ExtractOptions) -> Option<String>;

    /// Fetch and extract in one go. Failures are logged and reported as `None`.
    async fn fetch_article_content(&self, url: &str) -> Option<String> {
        match self.fetch(url).await {
            Ok(Some(raw)) => self.extract(&raw, ExtractOptions::default()),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Extraction failed for {}: {}", url, e);
                None
            }
        }
    }
}
