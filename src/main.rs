use mongolens::assistant::DataAssistant;
use mongolens::config::LensConfig;
use mongolens::connection::ConnectionPool;
use mongolens::llm::OpenAiChatClient;
use mongolens::schema_cache::{MemoryCacheStore, SchemaCache};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongolens")]
#[command(about = "Schema inference and conversational querying for MongoDB")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and print the inferred schema for a database
    Analyze {
        /// Connection string including the database name
        uri: String,

        /// Print the snapshot as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Ask a question about the connected database
    Ask {
        /// Connection string including the database name
        uri: String,

        /// The question, in plain language
        question: String,

        /// OpenAI API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,

        /// Model name
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,

        /// API base URL
        #[arg(long, default_value = "https://api.openai.com/v1")]
        base_url: String,
    },
    /// Probe a connection string: liveness and read-only status
    Validate {
        uri: String,
    },
    /// List databases visible in the cluster
    Databases {
        uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mongolens=info".parse()?))
        .init();

    let config = LensConfig::from_env();
    let pool = Arc::new(ConnectionPool::new(config.clone()));
    let sweeper = pool.start_sweeper();

    let result = run(&Args::parse(), config, Arc::clone(&pool)).await;

    sweeper.abort();
    pool.close_all();
    result
}

async fn run(args: &Args, config: LensConfig, pool: Arc<ConnectionPool>) -> Result<()> {
    match &args.command {
        Commands::Analyze { uri, json } => {
            let assistant = build_assistant(config, pool, None);
            let snapshot = assistant.extract_schema(uri).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!(
                    "{} collections, {} documents, {} fields/collection on average",
                    snapshot.stats.total_collections,
                    snapshot.stats.total_documents,
                    snapshot.stats.average_field_count
                );
                for collection in &snapshot.collections {
                    println!(
                        "  {} ({} docs, {} fields)",
                        collection.name,
                        collection.document_count,
                        collection.fields.len()
                    );
                }
                for rel in &snapshot.relationships {
                    println!(
                        "  {}.{} -> {} ({:?})",
                        rel.from, rel.field, rel.to, rel.relationship_type
                    );
                }
            }
        }
        Commands::Ask {
            uri,
            question,
            api_key,
            model,
            base_url,
        } => {
            let key = api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let generator = key.map(|k| {
                Arc::new(OpenAiChatClient::new(k, model.clone(), base_url.clone()))
                    as Arc<dyn mongolens::llm::TextGenerator>
            });
            if generator.is_none() {
                info!("no API key; replying with the structured context only");
            }

            let assistant = build_assistant(config, pool, generator);
            let reply = assistant.ask("cli", uri, question, &[]).await?;
            println!("{}", reply.answer);
            info!(
                confidence = reply.intent.confidence,
                executed = reply.outcome.is_some(),
                tokens = reply.tokens_used,
                "turn complete"
            );
        }
        Commands::Validate { uri } => {
            let validation = pool.validate_connection(uri).await;
            println!("{}", serde_json::to_string_pretty(&validation)?);
        }
        Commands::Databases { uri } => {
            let handle = pool.acquire(uri).await?;
            let names = handle.list_databases().await?;
            pool.release(uri);
            for name in names {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

fn build_assistant(
    config: LensConfig,
    pool: Arc<ConnectionPool>,
    generator: Option<Arc<dyn mongolens::llm::TextGenerator>>,
) -> DataAssistant {
    let cache = SchemaCache::new(
        Arc::new(MemoryCacheStore::new()),
        None,
        config.schema_ttl(),
    );
    DataAssistant::new(config, pool, cache, generator)
}
