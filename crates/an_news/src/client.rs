use std::sync::Arc;

use an_core::news::{
    EverythingParams, HeadlinesParams, NewsProvider, RawArticle, SourceParams, STATUS_OK,
};
use an_core::types::TIMESTAMP_FORMAT;
use an_core::{
    BatchOutcome, CancelSignal, Category, Error, Extractor, NewsArticle, Result, Source, TaskPool,
};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Largest page the provider serves in one request.
pub const MAX_PAGE_SIZE: u32 = 100;

const MIXED_FILTERS: &str = "cannot mix country/category param with sources param";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortBy {
    Relevancy,
    Popularity,
    #[value(name = "publishedAt")]
    PublishedAt,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevancy => "relevancy",
            SortBy::Popularity => "popularity",
            SortBy::PublishedAt => "publishedAt",
        }
    }
}

/// Filters for the "everything" search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub q_in_title: Option<String>,
    pub sources: Option<Vec<Source>>,
    pub domains: Option<Vec<String>>,
    pub exclude_domains: Option<Vec<String>>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub language: String,
    pub sort_by: Option<SortBy>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            q: None,
            q_in_title: None,
            sources: None,
            domains: None,
            exclude_domains: None,
            from_date: None,
            to_date: None,
            language: "en".to_string(),
            sort_by: None,
            page: None,
            page_size: None,
        }
    }
}

impl SearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadlinesQuery {
    pub q: Option<String>,
    pub q_in_title: Option<String>,
    pub sources: Option<Vec<Source>>,
    pub category: Option<Category>,
    pub country: Option<String>,
    pub language: String,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Default for HeadlinesQuery {
    fn default() -> Self {
        Self {
            q: None,
            q_in_title: None,
            sources: None,
            category: None,
            country: None,
            language: "en".to_string(),
            page: None,
            page_size: None,
        }
    }
}

/// Bridge to the news provider that also pulls full article text.
#[derive(Clone)]
pub struct NewsClient {
    provider: Arc<dyn NewsProvider>,
    extractor: Arc<dyn Extractor>,
    pool: TaskPool,
}

impl NewsClient {
    pub fn new(provider: Arc<dyn NewsProvider>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            provider,
            extractor,
            pool: TaskPool::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        let cancel = self.pool.cancel_signal().clone();
        self.pool = TaskPool::new(workers).with_cancel(cancel);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.pool = self.pool.with_cancel(cancel);
        self
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        self.pool.cancel_signal()
    }

    /// Sources matching every supplied filter.
    ///
    /// The provider's answer is filtered again locally; a source whose
    /// language, category or country disagrees is dropped.
    pub async fn list_sources(
        &self,
        category: Option<Category>,
        language: &str,
        country: Option<&str>,
    ) -> Result<Vec<Source>> {
        let params = SourceParams {
            category: category.map(|c| c.to_string()),
            language: Some(language.to_string()),
            country: country.map(str::to_string),
        };
        let response = self.provider.list_sources(&params).await?;
        check_status(&response.status, &response.code, &response.message)?;

        let sources: Vec<Source> = response
            .sources
            .into_iter()
            .filter(|raw| raw.language.as_deref() == Some(language))
            .filter(|raw| match category {
                Some(wanted) => raw.category.as_deref() == Some(wanted.as_str()),
                None => true,
            })
            .filter(|raw| match country {
                Some(wanted) => raw.country.as_deref() == Some(wanted),
                None => true,
            })
            .map(|raw| {
                Source::new(raw.id, raw.name)
                    .with_language(raw.language.as_deref().unwrap_or(language))
                    .with_category(raw.category.as_deref().and_then(|c| c.parse().ok()))
                    .with_country(raw.country)
                    .with_details(raw.url, raw.description)
            })
            .collect();

        tracing::debug!("📚 {} sources for language={}", sources.len(), language);
        Ok(sources)
    }

    /// Raw records from the "everything" endpoint.
    pub async fn search_articles(&self, query: &SearchQuery) -> Result<Vec<RawArticle>> {
        check_page_size(query.page_size)?;

        let params = EverythingParams {
            q: query.q.clone(),
            q_in_title: query.q_in_title.clone(),
            sources: Source::id_list(query.sources.as_deref()),
            domains: join_list(query.domains.as_deref()),
            exclude_domains: join_list(query.exclude_domains.as_deref()),
            from: query.from_date.map(|d| d.format(TIMESTAMP_FORMAT).to_string()),
            to: query.to_date.map(|d| d.format(TIMESTAMP_FORMAT).to_string()),
            language: Some(query.language.clone()),
            sort_by: query.sort_by.map(|s| s.as_str().to_string()),
            page: query.page,
            page_size: query.page_size,
        };
        let response = self.provider.search_everything(&params).await?;
        check_status(&response.status, &response.code, &response.message)?;

        tracing::info!(
            "🔎 Search returned {} of {} articles",
            response.articles.len(),
            response.total_results
        );
        Ok(response.articles)
    }

    /// Raw records from the top-headlines endpoint.
    ///
    /// Fails before contacting the provider when `sources` is combined with
    /// `category` or `country`.
    pub async fn top_headlines(&self, query: &HeadlinesQuery) -> Result<Vec<RawArticle>> {
        let has_sources = query.sources.as_ref().is_some_and(|s| !s.is_empty());
        if has_sources && (query.category.is_some() || query.country.is_some()) {
            return Err(Error::InvalidArgument(MIXED_FILTERS.to_string()));
        }
        check_page_size(query.page_size)?;

        let params = HeadlinesParams {
            q: query.q.clone(),
            q_in_title: query.q_in_title.clone(),
            sources: Source::id_list(query.sources.as_deref()),
            category: query.category.map(|c| c.to_string()),
            country: query.country.clone(),
            language: Some(query.language.clone()),
            page: query.page,
            page_size: query.page_size,
        };
        let response = self.provider.top_headlines(&params).await?;
        check_status(&response.status, &response.code, &response.message)?;
        Ok(response.articles)
    }

    /// Search and turn every hit into a [`NewsArticle`] with full text.
    pub async fn get_articles(&self, query: &SearchQuery) -> Result<BatchOutcome<NewsArticle>> {
        let raw = self.search_articles(query).await?;
        Ok(self.enrich_and_build_articles(raw).await)
    }

    pub async fn get_top_headlines(
        &self,
        query: &HeadlinesQuery,
    ) -> Result<BatchOutcome<NewsArticle>> {
        let raw = self.top_headlines(query).await?;
        Ok(self.enrich_and_build_articles(raw).await)
    }

    /// Builds one article per record, fetching full text concurrently.
    ///
    /// Extraction failures fall back to the provider snippet. A record that
    /// cannot be turned into an article at all (bad timestamp) ends up in
    /// `failures` without affecting its siblings.
    pub async fn enrich_and_build_articles(
        &self,
        records: Vec<RawArticle>,
    ) -> BatchOutcome<NewsArticle> {
        let total = records.len();
        let extractor = self.extractor.clone();
        let outcome = self
            .pool
            .run(records, move |index, record| {
                let extractor = extractor.clone();
                async move {
                    let content = extractor.fetch_article_content(&record.url).await;
                    if content.is_none() {
                        tracing::debug!(
                            "Article {} ({}) falls back to the provider snippet",
                            index,
                            record.url
                        );
                    }
                    build_article(record, content)
                }
            })
            .await;

        for (index, e) in &outcome.failures {
            tracing::warn!("⚠️ Skipping article {}: {}", index, e);
        }
        tracing::info!(
            "📰 Built {}/{} articles{}",
            outcome.len(),
            total,
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        outcome
    }
}

fn check_status(status: &str, code: &Option<String>, message: &Option<String>) -> Result<()> {
    if status == STATUS_OK {
        return Ok(());
    }
    Err(Error::Provider(format!(
        "status={} code={} message={}",
        status,
        code.as_deref().unwrap_or("-"),
        message.as_deref().unwrap_or("-")
    )))
}

fn check_page_size(page_size: Option<u32>) -> Result<()> {
    match page_size {
        Some(size) if size == 0 || size > MAX_PAGE_SIZE => Err(Error::InvalidArgument(format!(
            "page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, size
        ))),
        _ => Ok(()),
    }
}

fn join_list(values: Option<&[String]>) -> Option<String> {
    values.filter(|v| !v.is_empty()).map(|v| v.join(","))
}

pub(crate) fn parse_published_at(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Parse(format!("invalid publishedAt {:?}: {}", value, e)))
}

fn build_article(record: RawArticle, content: Option<String>) -> Result<NewsArticle> {
    let published_at = parse_published_at(&record.published_at)?;
    Ok(NewsArticle {
        title: record.title.unwrap_or_default(),
        author: record.author,
        content: content.or(record.content).unwrap_or_default(),
        description: record.description,
        published_at,
        source: Source::new(record.source.id, record.source.name),
        url: record.url,
        image_url: record.url_to_image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use an_core::news::{
        ArticlesResponse, ExtractOptions, RawArticleSource, RawSource, SourcesResponse,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubProvider {
        status: String,
        sources: Vec<RawSource>,
        articles: Vec<RawArticle>,
        calls: AtomicUsize,
        last_everything: Mutex<Option<EverythingParams>>,
    }

    impl StubProvider {
        fn ok() -> Self {
            Self {
                status: "ok".to_string(),
                ..Default::default()
            }
        }

        fn articles_response(&self) -> ArticlesResponse {
            ArticlesResponse {
                status: self.status.clone(),
                total_results: self.articles.len(),
                articles: self.articles.clone(),
                code: None,
                message: None,
            }
        }
    }

    #[async_trait]
    impl NewsProvider for StubProvider {
        async fn list_sources(&self, _params: &SourceParams) -> Result<SourcesResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourcesResponse {
                status: self.status.clone(),
                sources: self.sources.clone(),
                code: Some("rateLimited".to_string()),
                message: None,
            })
        }

        async fn search_everything(&self, params: &EverythingParams) -> Result<ArticlesResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_everything.lock().unwrap() = Some(params.clone());
            Ok(self.articles_response())
        }

        async fn top_headlines(&self, _params: &HeadlinesParams) -> Result<ArticlesResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.articles_response())
        }
    }

    /// Serves pages from a map; URLs containing "broken" error out.
    #[derive(Default)]
    struct StubExtractor {
        pages: HashMap<String, String>,
        cancel_after_fetch: Option<CancelSignal>,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        async fn fetch(&self, url: &str) -> Result<Option<String>> {
            if let Some(cancel) = &self.cancel_after_fetch {
                cancel.cancel();
            }
            if url.contains("broken") {
                return Err(Error::Extraction("connection reset".to_string()));
            }
            Ok(self.pages.get(url).cloned())
        }

        fn extract(&self, raw: &str, _options: ExtractOptions) -> Option<String> {
            Some(raw.to_string())
        }
    }

    fn raw_source(id: &str, language: &str, category: &str, country: &str) -> RawSource {
        RawSource {
            id: Some(id.to_string()),
            name: id.to_uppercase(),
            language: Some(language.to_string()),
            category: Some(category.to_string()),
            country: Some(country.to_string()),
            ..Default::default()
        }
    }

    fn raw_article(url: &str, snippet: &str) -> RawArticle {
        RawArticle {
            source: RawArticleSource {
                id: Some("wired".to_string()),
                name: "Wired".to_string(),
            },
            title: Some(format!("Title of {}", url)),
            url: url.to_string(),
            published_at: "2024-05-01T13:04:15Z".to_string(),
            content: Some(snippet.to_string()),
            ..Default::default()
        }
    }

    fn client(provider: Arc<StubProvider>, extractor: StubExtractor) -> NewsClient {
        NewsClient::new(provider, Arc::new(extractor))
    }

    #[tokio::test]
    async fn test_list_sources_refilters_provider_output() {
        let provider = Arc::new(StubProvider {
            sources: vec![
                raw_source("wired", "en", "technology", "us"),
                raw_source("le-monde", "fr", "technology", "fr"),
                raw_source("espn", "en", "sports", "us"),
                raw_source("bbc", "en", "technology", "gb"),
            ],
            ..StubProvider::ok()
        });
        let news = client(provider, StubExtractor::default());

        let sources = news
            .list_sources(Some(Category::Technology), "en", Some("us"))
            .await
            .unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0], "WIRED");
        assert_eq!(sources[0].category, Some(Category::Technology));
        assert_eq!(sources[0].language(), "en");

        let sources = news.list_sources(None, "en", None).await.unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["WIRED", "ESPN", "BBC"]);
    }

    #[tokio::test]
    async fn test_non_ok_status_is_provider_error() {
        let provider = Arc::new(StubProvider {
            status: "error".to_string(),
            ..Default::default()
        });
        let news = client(provider, StubExtractor::default());

        let err = news.list_sources(None, "en", None).await.unwrap_err();
        assert!(matches!(err, Error::Provider(msg) if msg.contains("rateLimited")));

        let err = news.search_articles(&SearchQuery::new("ai")).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn test_headlines_reject_mixed_filters_before_calling_provider() {
        let provider = Arc::new(StubProvider::ok());
        let news = client(provider.clone(), StubExtractor::default());

        let query = HeadlinesQuery {
            sources: Some(vec![Source::new(Some("wired".to_string()), "Wired")]),
            category: Some(Category::Technology),
            ..Default::default()
        };
        let err = news.top_headlines(&query).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(err.user_message(), MIXED_FILTERS);

        let query = HeadlinesQuery {
            sources: Some(vec![Source::new(Some("wired".to_string()), "Wired")]),
            country: Some("us".to_string()),
            ..Default::default()
        };
        assert!(news.get_top_headlines(&query).await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        // An empty source list is no source filter at all.
        let query = HeadlinesQuery {
            sources: Some(vec![]),
            category: Some(Category::Technology),
            ..Default::default()
        };
        assert!(news.top_headlines(&query).await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_serializes_filters() {
        let provider = Arc::new(StubProvider::ok());
        let news = client(provider.clone(), StubExtractor::default());

        let query = SearchQuery {
            sources: Some(vec![
                Source::new(Some("wired".to_string()), "Wired"),
                Source::new(Some("the-verge".to_string()), "The Verge"),
            ]),
            domains: Some(vec!["bbc.co.uk".to_string(), "engadget.com".to_string()]),
            exclude_domains: Some(vec![]),
            from_date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 13, 4, 15).unwrap()),
            sort_by: Some(SortBy::PublishedAt),
            page_size: Some(100),
            ..SearchQuery::new("artificial intelligence")
        };
        news.search_articles(&query).await.unwrap();

        let params = provider.last_everything.lock().unwrap().clone().unwrap();
        assert_eq!(params.sources.as_deref(), Some("wired,the-verge"));
        assert_eq!(params.domains.as_deref(), Some("bbc.co.uk,engadget.com"));
        assert_eq!(params.exclude_domains, None);
        assert_eq!(params.from.as_deref(), Some("2024-05-01T13:04:15"));
        assert_eq!(params.to, None);
        assert_eq!(params.language.as_deref(), Some("en"));
        assert_eq!(params.sort_by.as_deref(), Some("publishedAt"));
    }

    #[tokio::test]
    async fn test_search_without_sources_sends_no_source_constraint() {
        let provider = Arc::new(StubProvider::ok());
        let news = client(provider.clone(), StubExtractor::default());

        let query = SearchQuery {
            sources: Some(vec![]),
            ..SearchQuery::new("ai")
        };
        news.search_articles(&query).await.unwrap();
        let params = provider.last_everything.lock().unwrap().clone().unwrap();
        assert_eq!(params.sources, None);
    }

    #[tokio::test]
    async fn test_page_size_out_of_range() {
        let provider = Arc::new(StubProvider::ok());
        let news = client(provider.clone(), StubExtractor::default());

        for size in [0, 101] {
            let query = SearchQuery {
                page_size: Some(size),
                ..SearchQuery::new("ai")
            };
            let err = news.search_articles(&query).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_extraction_keeps_snippet() {
        let provider = Arc::new(StubProvider {
            articles: vec![
                raw_article("https://a.test/full", "snippet a"),
                raw_article("https://a.test/missing", "snippet b"),
                raw_article("https://a.test/broken", "snippet c"),
            ],
            ..StubProvider::ok()
        });
        let mut pages = HashMap::new();
        pages.insert("https://a.test/full".to_string(), "Full body of a".to_string());
        let news = client(
            provider,
            StubExtractor {
                pages,
                ..Default::default()
            },
        );

        let outcome = news.get_articles(&SearchQuery::new("ai")).await.unwrap();
        assert!(outcome.failures.is_empty());
        let articles = outcome.values();
        let contents: Vec<&str> = articles.iter().map(|a| a.content.as_str()).collect();
        assert_eq!(contents, vec!["Full body of a", "snippet b", "snippet c"]);
        assert_eq!(articles[0].source, "Wired");
        assert_eq!(
            articles[0].published_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 13, 4, 15).unwrap()
        );
    }

    #[tokio::test]
    async fn test_bad_timestamp_is_isolated() {
        let mut bad = raw_article("https://a.test/2", "two");
        bad.published_at = "yesterday".to_string();
        let news = client(Arc::new(StubProvider::ok()), StubExtractor::default());

        let outcome = news
            .enrich_and_build_articles(vec![
                raw_article("https://a.test/1", "one"),
                bad,
                raw_article("https://a.test/3", "three"),
            ])
            .await;
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 1);
        let contents: Vec<String> = outcome.values().into_iter().map(|a| a.content).collect();
        assert_eq!(contents, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_cancelled_enrichment_returns_fewer_articles() {
        let cancel = CancelSignal::new();
        let news = client(
            Arc::new(StubProvider::ok()),
            StubExtractor {
                cancel_after_fetch: Some(cancel.clone()),
                ..Default::default()
            },
        )
        .with_workers(1)
        .with_cancel(cancel.clone());

        let records: Vec<RawArticle> = (0..4)
            .map(|i| raw_article(&format!("https://a.test/{}", i), "snippet"))
            .collect();
        let outcome = news.enrich_and_build_articles(records).await;
        assert!(outcome.cancelled);
        assert!(outcome.len() < 4);
    }

    #[test]
    fn test_parse_published_at_accepts_both_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 13, 4, 15).unwrap();
        assert_eq!(parse_published_at("2024-05-01T13:04:15Z").unwrap(), expected);
        assert_eq!(parse_published_at("2024-05-01T15:04:15+02:00").unwrap(), expected);
        assert_eq!(parse_published_at("2024-05-01T13:04:15").unwrap(), expected);
        assert!(parse_published_at("May 1st").is_err());
    }
}
