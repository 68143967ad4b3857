use clap::{Args, Subcommand};
use an_core::{Category, Result, Source};

use crate::client::{HeadlinesQuery, NewsClient};

#[derive(Args, Debug)]
pub struct NewsArgs {
    #[command(subcommand)]
    pub command: NewsCommands,
}

#[derive(Subcommand, Debug)]
pub enum NewsCommands {
    /// List news sources, optionally filtered
    Sources {
        /// Category, e.g. technology or business
        #[arg(long)]
        category: Option<Category>,
        /// Two letter language code
        #[arg(long, default_value = "en")]
        language: String,
        /// Two letter country code, e.g. us
        #[arg(long)]
        country: Option<String>,
    },
    /// Show today's top headlines with their full text length
    Headlines {
        /// Keywords to search for
        #[arg(short, long)]
        query: Option<String>,
        /// Comma separated source ids (cannot be combined with category/country)
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long, default_value = "en")]
        language: String,
        /// Articles per request, at most 100
        #[arg(long)]
        page_size: Option<u32>,
    },
}

pub async fn handle_command(args: NewsArgs, client: &NewsClient) -> Result<()> {
    match args.command {
        NewsCommands::Sources {
            category,
            language,
            country,
        } => {
            let sources = client
                .list_sources(category, &language, country.as_deref())
                .await?;
            println!("Found {} sources", sources.len());
            for source in sources {
                println!(
                    "  {:<28} {:<14} {}",
                    source.id.as_deref().unwrap_or("-"),
                    source.category.map(|c| c.as_str()).unwrap_or("-"),
                    source.name
                );
            }
        }
        NewsCommands::Headlines {
            query,
            sources,
            category,
            country,
            language,
            page_size,
        } => {
            let sources: Vec<Source> = sources
                .into_iter()
                .map(|id| Source::new(Some(id.clone()), id))
                .collect();
            let query = HeadlinesQuery {
                q: query,
                sources: if sources.is_empty() { None } else { Some(sources) },
                category,
                country,
                language,
                page_size,
                ..Default::default()
            };
            let outcome = client.get_top_headlines(&query).await?;
            for (_, article) in &outcome.completed {
                println!(
                    "🆕 {} - {} ({} chars)",
                    article.title,
                    article.url,
                    article.content.chars().count()
                );
            }
            for (index, e) in &outcome.failures {
                eprintln!("Failed to build article {}: {}", index, e);
            }
        }
    }
    Ok(())
}
