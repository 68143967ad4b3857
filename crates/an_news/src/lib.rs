pub mod cli;
pub mod client;
pub mod extractor;
pub mod provider;

pub use cli::{handle_command, NewsArgs, NewsCommands};
pub use client::{HeadlinesQuery, NewsClient, SearchQuery, SortBy, MAX_PAGE_SIZE};
pub use extractor::HtmlExtractor;
pub use provider::NewsApiProvider;

pub mod prelude {
    pub use super::{HtmlExtractor, NewsApiProvider, NewsClient, SearchQuery};
    pub use an_core::{Error, NewsArticle, Result, Source};
}
