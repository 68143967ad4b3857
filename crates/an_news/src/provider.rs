use std::env;
use std::fmt;
use std::time::Duration;

use an_core::news::{
    ArticlesResponse, EverythingParams, HeadlinesParams, NewsProvider, SourceParams, SourcesResponse,
};
use an_core::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://newsapi.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Query = Vec<(&'static str, String)>;

/// The JSON NewsAPI sends with a non-2xx status.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// HTTP client for the NewsAPI v2 endpoints.
pub struct NewsApiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl fmt::Debug for NewsApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewsApiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl NewsApiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Reads the key from `NEWS_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("NEWS_API_KEY")
            .map_err(|_| Error::Config("NEWS_API_KEY is not set".to_string()))?;
        Self::new(api_key)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &Query) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        // Gateways in front of the API answer with HTML, so the body may not be JSON.
        let body = response.text().await.unwrap_or_default();
        let error = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody {
                code: Some(code),
                message,
            }) => format!(
                "status={} code={} message={}",
                status.as_u16(),
                code,
                message.as_deref().unwrap_or("-")
            ),
            _ => format!(
                "status={} body={}",
                status.as_u16(),
                body.chars().take(200).collect::<String>().trim()
            ),
        };
        Err(Error::Provider(error))
    }
}

fn push(query: &mut Query, key: &'static str, value: &Option<String>) {
    if let Some(value) = value {
        query.push((key, value.clone()));
    }
}

fn push_num(query: &mut Query, key: &'static str, value: Option<u32>) {
    if let Some(value) = value {
        query.push((key, value.to_string()));
    }
}

pub(crate) fn source_query(params: &SourceParams) -> Query {
    let mut query = Vec::new();
    push(&mut query, "category", &params.category);
    push(&mut query, "language", &params.language);
    push(&mut query, "country", &params.country);
    query
}

pub(crate) fn everything_query(params: &EverythingParams) -> Query {
    let mut query = Vec::new();
    push(&mut query, "q", &params.q);
    push(&mut query, "qInTitle", &params.q_in_title);
    push(&mut query, "sources", &params.sources);
    push(&mut query, "domains", &params.domains);
    push(&mut query, "excludeDomains", &params.exclude_domains);
    push(&mut query, "from", &params.from);
    push(&mut query, "to", &params.to);
    push(&mut query, "language", &params.language);
    push(&mut query, "sortBy", &params.sort_by);
    push_num(&mut query, "page", params.page);
    push_num(&mut query, "pageSize", params.page_size);
    query
}

pub(crate) fn headlines_query(params: &HeadlinesParams) -> Query {
    let mut query = Vec::new();
    push(&mut query, "q", &params.q);
    push(&mut query, "qInTitle", &params.q_in_title);
    push(&mut query, "sources", &params.sources);
    push(&mut query, "category", &params.category);
    push(&mut query, "country", &params.country);
    push(&mut query, "language", &params.language);
    push_num(&mut query, "page", params.page);
    push_num(&mut query, "pageSize", params.page_size);
    query
}

#[async_trait]
impl NewsProvider for NewsApiProvider {
    async fn list_sources(&self, params: &SourceParams) -> Result<SourcesResponse> {
        self.get("/v2/top-headlines/sources", &source_query(params)).await
    }

    async fn search_everything(&self, params: &EverythingParams) -> Result<ArticlesResponse> {
        self.get("/v2/everything", &everything_query(params)).await
    }

    async fn top_headlines(&self, params: &HeadlinesParams) -> Result<ArticlesResponse> {
        self.get("/v2/top-headlines", &headlines_query(params)).await
    }
}
