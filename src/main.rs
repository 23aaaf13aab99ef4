use anyhow::Result;
use clap::{Parser, Subcommand};
use scout::{transport, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scout")]
#[command(author, version, about = "Chat with arXiv and Wikipedia through a ReAct agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the browser chat widget and its API
    Serve {
        /// Port to listen on (default from config, 8501)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default from config, 127.0.0.1)
        #[arg(long)]
        host: Option<String>,
    },

    /// Interactive chat in the terminal
    Chat {
        /// Groq API key (falls back to GROQ_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Ask a single question and print the answer
    Ask {
        /// The question
        message: String,

        /// Groq API key (falls back to GROQ_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "scout=debug" } else { "scout=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SCOUT_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            tracing::info!("Starting HTTP server on {}:{}", host, port);
            transport::http::run_http_server(&host, port, config).await?;
        }
        Commands::Chat { api_key } => {
            transport::cli::run_chat(config, api_key).await?;
        }
        Commands::Ask { message, api_key } => {
            transport::cli::run_ask(config, &message, api_key).await?;
        }
    }

    Ok(())
}
