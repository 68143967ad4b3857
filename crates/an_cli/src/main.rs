use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use an_core::logging::init_logging;
use an_core::pool::DEFAULT_WORKERS;
use an_core::{CancelSignal, Category, ChatMessage};
use an_inference::{create_model, ModelKind, Models};
use an_news::{handle_command, HtmlExtractor, NewsApiProvider, NewsArgs, NewsClient, NewsCommands};
use an_rag::config::{
    DEFAULT_LANGUAGE, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_STORAGE_PATH, DEFAULT_TOPIC, DEFAULT_TOP_K,
};
use an_rag::{Answer, ChatEngine, EngineCache, EngineKey, IndexManager, RagConfig, ResponseMode};
use an_storage::{create_store, ClientType};
use an_web::AppState;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "ainews", author, version, about = "Chat with the latest news on a topic", long_about = None)]
struct Cli {
    #[command(flatten)]
    opts: Options,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct Options {
    /// Vector store: local, memory, http or cloud
    #[arg(long, default_value = "local")]
    store: String,
    /// Directory of the local store
    #[arg(long, default_value = DEFAULT_STORAGE_PATH)]
    storage_path: PathBuf,
    /// Chroma server URL for the http store
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long, value_enum, default_value_t = ModelKind::OpenAi)]
    model: ModelKind,
    /// Chat model name, e.g. gpt-4o-mini
    #[arg(long)]
    chat_model: Option<String>,
    #[arg(long, default_value = DEFAULT_TOPIC)]
    topic: String,
    /// Collection name, derived from the topic when omitted
    #[arg(long)]
    collection: Option<String>,
    #[arg(long)]
    category: Option<Category>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    language: String,
    /// Articles to fetch when building, at most 100
    #[arg(long)]
    page_size: Option<u32>,
    /// Split by meaning instead of by sentence (slower)
    #[arg(long)]
    semantic: bool,
    /// Maximum chunk length in characters
    #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_SIZE)]
    max_chunk_size: usize,
    /// Passages retrieved per question
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
    /// Earlier questions folded into retrieval
    #[arg(long, default_value_t = 0)]
    history_turns: usize,
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    #[arg(short, long)]
    verbose: bool,
}

impl Options {
    fn rag_config(&self) -> RagConfig {
        RagConfig {
            topic: self.topic.clone(),
            collection_name: self
                .collection
                .clone()
                .unwrap_or_else(|| RagConfig::collection_name_for(&self.topic)),
            language: self.language.clone(),
            category: self.category,
            country: self.country.clone(),
            use_semantic_splitter: self.semantic,
            max_chunk_size: self.max_chunk_size,
            storage_path: self.storage_path.clone(),
            top_k: self.top_k,
            workers: self.workers,
            query_history_turns: self.history_turns,
            page_size: self.page_size,
        }
    }

    fn inference_config(&self) -> an_inference::Config {
        let mut config = an_inference::Config::from_env();
        if let Some(chat_model) = &self.chat_model {
            config.chat_model = chat_model.clone();
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the topic index, or confirm it already exists
    Index,
    /// Ask one question
    Ask {
        question: String,
        /// Print the answer once complete instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Interactive chat. `/reset` clears history, `/reload` reopens the index
    Chat,
    /// Serve the chat API over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },
    #[command(flatten)]
    News(NewsCommands),
}

fn news_client(opts: &Options) -> anyhow::Result<NewsClient> {
    let provider = NewsApiProvider::from_env()?;
    let extractor = HtmlExtractor::new()?;
    Ok(NewsClient::new(Arc::new(provider), Arc::new(extractor)).with_workers(opts.workers))
}

/// Runs `fut` unless Ctrl-C arrives first.
async fn interruptible<F: Future>(fut: F) -> Option<F::Output> {
    tokio::select! {
        output = fut => Some(output),
        _ = tokio::signal::ctrl_c() => None,
    }
}

/// Runs `build` with a fresh cancel signal. On `interrupt` the signal is set
/// and the build is awaited until its running tasks drain.
async fn cancellable<F, Fut, T>(build: F, interrupt: impl Future<Output = ()>) -> anyhow::Result<T>
where
    F: FnOnce(CancelSignal) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let cancel = CancelSignal::new();
    let build = build(cancel.clone());
    tokio::pin!(build);
    tokio::select! {
        result = &mut build => result,
        _ = interrupt => {
            info!("🛑 Cancelling, waiting for running tasks");
            cancel.cancel();
            build.await
        }
    }
}

async fn open_engine(opts: &Options, models: &Models, cancel: CancelSignal) -> anyhow::Result<ChatEngine> {
    let config = opts.rag_config();
    let client = ClientType::from_kind(&opts.store, opts.storage_path.clone(), opts.backend_url.clone())?;
    let store = create_store(&client, Some(models.embedding.clone())).await?;
    info!("💾 Using {} vector store", store.name());

    let manager = IndexManager::new(config.clone(), news_client(opts)?, store)
        .with_embedder(models.embedding.clone())
        .with_splitter_model(models.embedding.clone())
        .with_cancel(cancel);
    let index = manager.get_or_create_default().await?;
    Ok(ChatEngine::from_config(index, models.completion.clone(), &config))
}

/// Opens or builds the index. Ctrl-C cancels a build in progress.
async fn build_engine(opts: &Options, models: &Models) -> anyhow::Result<ChatEngine> {
    cancellable(
        |cancel| open_engine(opts, models, cancel),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await
}

async fn print_answer(answer: Answer) -> anyhow::Result<String> {
    match answer {
        Answer::Text(text) => {
            println!("{}", text);
            Ok(text)
        }
        Answer::Stream(mut stream) => {
            let mut stdout = std::io::stdout();
            let mut full = String::new();
            while let Some(increment) = stream.next().await {
                let increment = increment?;
                print!("{}", increment);
                stdout.flush()?;
                full.push_str(&increment);
            }
            println!();
            Ok(full)
        }
    }
}

async fn chat_loop(opts: &Options, models: &Models) -> anyhow::Result<()> {
    let config = opts.rag_config();
    let key = EngineKey::new(
        &config.topic,
        &config.collection_name,
        opts.inference_config().api_key.as_deref(),
    );
    let cache = EngineCache::new();
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "Ask about {:?}. /reset clears history, /reload reopens the index, /quit or Ctrl-C exits.",
        config.topic
    );
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = interruptible(lines.next_line()).await else {
            println!();
            break;
        };
        let Some(line) = line? else {
            break;
        };
        let message = line.trim();
        match message {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                history.clear();
                println!("History cleared.");
                continue;
            }
            "/reload" => {
                cache.invalidate(&key).await;
                println!("Index will be reopened on the next question.");
                continue;
            }
            _ => {}
        }

        let engine = cache
            .get_or_try_insert_with(key.clone(), || async {
                build_engine(opts, models).await.map_err(|e| {
                    e.downcast::<an_core::Error>()
                        .unwrap_or_else(an_core::Error::External)
                })
            })
            .await;
        let engine = match engine {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!("Could not open the index: {}", e);
                println!("{}", e.user_message());
                continue;
            }
        };

        // Ctrl-C while answering drops the answer and returns to the prompt.
        let Some(answer) = interruptible(engine.ask(message, &history, ResponseMode::Streaming)).await
        else {
            println!("Interrupted.");
            continue;
        };
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Question failed: {}", e);
                println!("{}", e.user_message());
                continue;
            }
        };
        match interruptible(print_answer(answer)).await {
            Some(Ok(reply)) => {
                history.push(ChatMessage::user(message));
                history.push(ChatMessage::assistant(reply));
            }
            Some(Err(e)) => {
                tracing::error!("Streaming failed: {}", e);
                println!("\n{}", an_core::error::GENERIC_USER_MESSAGE);
            }
            None => println!("\nInterrupted."),
        }
    }
    Ok(())
}

fn prepare(opts: &Options) -> anyhow::Result<Models> {
    let models = create_model(opts.model, opts.inference_config())?;
    info!("🧠 Using {} model", models.completion.name());
    Ok(models)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let Cli { opts, command } = Cli::parse();
    init_logging(if opts.verbose { Level::DEBUG } else { Level::INFO });

    match command {
        Commands::News(command) => {
            let client = news_client(&opts)?;
            handle_command(NewsArgs { command }, &client).await?;
        }
        Commands::Index => {
            let models = prepare(&opts)?;
            let engine = build_engine(&opts, &models).await?;
            let index = engine.index();
            info!(
                "✨ Collection {} holds {} chunks",
                index.collection_name(),
                index.len().await?
            );
        }
        Commands::Ask {
            question,
            no_stream,
        } => {
            let models = prepare(&opts)?;
            let engine = build_engine(&opts, &models).await?;
            let mode = if no_stream {
                ResponseMode::Blocking
            } else {
                ResponseMode::Streaming
            };
            let run = async {
                print_answer(engine.ask(&question, &[], mode).await?).await?;
                Ok::<_, anyhow::Error>(())
            };
            match interruptible(run).await {
                Some(result) => result?,
                None => info!("🛑 Interrupted"),
            }
        }
        Commands::Chat => {
            let models = prepare(&opts)?;
            chat_loop(&opts, &models).await?;
        }
        Commands::Serve { addr } => {
            let models = prepare(&opts)?;
            let engine = build_engine(&opts, &models).await?;
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                info!("🛑 Shutting down");
            };
            an_web::serve(AppState::new(Arc::new(engine)), addr, shutdown).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_rag_config() {
        let cli = Cli::try_parse_from(["ainews", "index"]).unwrap();
        assert_eq!(cli.opts.rag_config(), RagConfig::default());
        assert_eq!(cli.opts.model, ModelKind::OpenAi);
    }

    #[test]
    fn test_collection_derives_from_topic() {
        let cli = Cli::try_parse_from([
            "ainews",
            "--topic",
            "Climate Change",
            "--semantic",
            "--category",
            "science",
            "ask",
            "what changed?",
        ])
        .unwrap();
        let config = cli.opts.rag_config();
        assert_eq!(config.collection_name, "climate_change");
        assert!(config.use_semantic_splitter);
        assert_eq!(config.category, Some(Category::Science));
        assert!(matches!(cli.command, Commands::Ask { no_stream: false, .. }));
    }

    #[tokio::test]
    async fn test_interrupt_cancels_build_and_next_build_starts_fresh() {
        let interrupted = cancellable(
            |cancel| async move {
                while !cancel.is_cancelled() {
                    tokio::task::yield_now().await;
                }
                Err::<(), anyhow::Error>(an_core::Error::Cancelled.into())
            },
            async {},
        )
        .await
        .unwrap_err();
        assert!(matches!(
            interrupted.downcast_ref::<an_core::Error>(),
            Some(an_core::Error::Cancelled)
        ));

        let rebuilt = cancellable(
            |cancel| async move {
                cancel.check()?;
                Ok::<_, anyhow::Error>(7)
            },
            std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(rebuilt, 7);
    }

    #[test]
    fn test_news_subcommands_are_inlined() {
        let cli = Cli::try_parse_from(["ainews", "sources", "--language", "fr"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::News(NewsCommands::Sources { .. })
        ));
    }
}
