use anyhow::Result;
use clap::{Parser, Subcommand};
use nobellm::config::Config;
use nobellm::orchestrator::QueryRequest;
use nobellm::registry::ServiceRegistry;
use nobellm::themes::{ThemeConfig, ThemeEmbeddings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nobellm", about = "Retrieval-augmented QA over Nobel Literature speeches")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP service (default)
    Serve,
    /// Run one query through the full pipeline and print the JSON response
    Query {
        /// The natural-language question
        text: String,
        /// Override the retrieval depth
        #[arg(long)]
        top_k: Option<usize>,
        /// Override the similarity floor
        #[arg(long)]
        score_threshold: Option<f32>,
    },
    /// Load the theme embedding archive for the active model and print stats
    ThemeStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    nobellm::load_env();
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.runtime.log_level)
                .unwrap_or_else(|_| EnvFilter::new("nobellm=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("starting NobelLM query service");
            let registry = ServiceRegistry::initialize(config)?;
            nobellm::api::serve(registry).await?;
        }
        Command::Query {
            text,
            top_k,
            score_threshold,
        } => {
            let registry = ServiceRegistry::initialize(config)?;
            let outcome = registry
                .orchestrator
                .handle_query(QueryRequest {
                    query: text,
                    model_id: None,
                    score_threshold,
                    top_k,
                })
                .await;
            match outcome.result {
                Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                Err(error) => {
                    eprintln!(
                        "{}",
                        serde_json::to_string_pretty(&error.to_wire(&outcome.trace_id))?
                    );
                    std::process::exit(1);
                }
            }
        }
        Command::ThemeStats => {
            let dimensions = config.system.dimensions()?;
            let themes = ThemeConfig::load(config.system.theme_config_path.as_deref())?;
            let embeddings = ThemeEmbeddings::load(
                &config.system.theme_embeddings_dir,
                &config.system.model_id,
                dimensions,
                &themes,
            )?;
            println!("{}", serde_json::to_string_pretty(&embeddings.stats())?);
        }
    }
    Ok(())
}
