//! # Chatbot CLI (`chatbot`)
//!
//! ## Usage
//!
//! ```bash
//! chatbot --config ./config/chatbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatbot serve http` | Start the HTTP chat server |
//! | `chatbot serve mcp` | Serve the `chat` tool over stdio |
//! | `chatbot ask "<question>"` | Answer one question and print the reply JSON |
//! | `chatbot config` | Print the resolved configuration |
//!
//! Logs go to stderr; set `RUST_LOG` to change the filter.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chatbot::chat::ChatService;
use chatbot::config;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "chatbot=info";

/// Chatbot: answers questions from web search results or a static file
/// using a pretrained inference pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chatbot.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "chatbot", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chatbot.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/chatbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Answer a single question through the configured chat pipeline.
    ///
    /// Prints the same JSON body `POST /chat` would return.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Print the resolved configuration as TOML.
    Config,
}

#[derive(Subcommand)]
enum ServeService {
    /// HTTP server with `POST /chat`, bound to `[server].bind`.
    Http,
    /// MCP tool server over stdin/stdout.
    Mcp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve { service } => match service {
            ServeService::Http => chatbot::server::run_server(&cfg).await?,
            ServeService::Mcp => chatbot::mcp::run_stdio(&cfg).await?,
        },
        Commands::Ask { question } => {
            let chat = ChatService::start(&cfg).await?;
            let reply = chat.reply(&question).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
