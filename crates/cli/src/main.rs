// Parley CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Chat history is read from the local store; only turns and admin calls hit the API.

mod client;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_client::{LocalStore, OwnerScope};
use parley_core::telemetry::{init_tracing, TelemetryConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI - Chat with configured models and manage the catalog")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(long, env = "PARLEY_API_URL", default_value = "http://localhost:9000")]
    pub api_url: String,

    /// Local chat database (default: ~/.parley/chats.db)
    #[arg(long, env = "PARLEY_DB")]
    pub db: Option<PathBuf>,

    /// Owner whose chats are used (guest when omitted)
    #[arg(long, env = "PARLEY_OWNER")]
    pub owner: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage local chats
    Chats {
        #[command(subcommand)]
        command: commands::chats::ChatsCommand,
    },

    /// Send a message and stream the response (Ctrl-C stops it)
    Send {
        /// Message text to send
        message: String,

        /// Chat ID (a new chat is created if omitted)
        #[arg(long, short)]
        chat: Option<String>,

        /// Model ID from `parley models list`
        #[arg(long, short)]
        model: String,

        /// System prompt ID
        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// Reattach to the latest turn of a chat
    Resume {
        /// Chat ID
        chat_id: String,
    },

    /// Browse the model catalog
    Models {
        #[command(subcommand)]
        command: commands::models::ModelsCommand,
    },

    /// Manage LLM providers
    Providers {
        #[command(subcommand)]
        command: commands::providers::ProvidersCommand,
    },
}

fn default_db_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .context("Cannot locate home directory; pass --db")?;
    Ok(PathBuf::from(home).join(".parley").join("chats.db"))
}

async fn open_store(db: Option<PathBuf>, owner: Option<&str>) -> Result<LocalStore> {
    let path = match db {
        Some(path) => path,
        None => default_db_path()?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = LocalStore::open(&path)
        .await
        .with_context(|| format!("Failed to open chat database {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Opened chat database");
    Ok(store.with_owner(OwnerScope::from_owner(owner)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so streamed tokens own stdout
    init_tracing(
        TelemetryConfig::from_env("parley-cli")
            .with_default_filter("warn")
            .with_stderr(),
    );

    let cli = Cli::parse();
    let client = client::Client::new(&cli.api_url);
    let output_format = output::OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Chats { command } => {
            let store = open_store(cli.db, cli.owner.as_deref()).await?;
            commands::chats::run(command, &store, output_format, cli.quiet).await
        }
        Commands::Send {
            message,
            chat,
            model,
            system_prompt,
        } => {
            let store = open_store(cli.db, cli.owner.as_deref()).await?;
            let args = commands::chat::SendArgs {
                chat_id: chat,
                model,
                system_prompt,
                message,
            };
            commands::chat::send(&store, &client, output_format, cli.quiet, args).await
        }
        Commands::Resume { chat_id } => {
            let store = open_store(cli.db, cli.owner.as_deref()).await?;
            commands::chat::resume(&store, &client, output_format, cli.quiet, chat_id).await
        }
        Commands::Models { command } => {
            commands::models::run(command, &client, output_format).await
        }
        Commands::Providers { command } => {
            commands::providers::run(command, &client, output_format, cli.quiet).await
        }
    }
}
