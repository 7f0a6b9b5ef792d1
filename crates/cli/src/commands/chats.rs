// Local chat history commands (no server round trip)

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use parley_client::LocalStore;

#[derive(Subcommand)]
pub enum ChatsCommand {
    /// List chats, most recently active first
    List,

    /// Show a chat and its messages
    Show {
        /// Chat ID
        chat_id: String,
    },

    /// Create an empty chat
    Create {
        /// Chat title (otherwise taken from the first message)
        #[arg(long)]
        title: Option<String>,
    },

    /// Delete a chat and its messages
    Delete {
        /// Chat ID
        chat_id: String,
    },
}

pub async fn run(
    command: ChatsCommand,
    store: &LocalStore,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    match command {
        ChatsCommand::List => list(store, output).await,
        ChatsCommand::Show { chat_id } => show(store, output, &chat_id).await,
        ChatsCommand::Create { title } => create(store, output, quiet, title.as_deref()).await,
        ChatsCommand::Delete { chat_id } => delete(store, output, quiet, &chat_id).await,
    }
}

async fn list(store: &LocalStore, output: OutputFormat) -> Result<()> {
    let chats = store.get_chats().await?;

    if !output.is_text() {
        return output.print_value(&chats);
    }
    if chats.is_empty() {
        println!("No chats found");
        return Ok(());
    }

    print_table_header(&[("ID", 36), ("TITLE", 40), ("UPDATED", 20)]);
    for chat in &chats {
        print_table_row(&[
            (&chat.id, 36),
            (chat.title.as_deref().unwrap_or("(untitled)"), 40),
            (&chat.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(), 20),
        ]);
    }
    Ok(())
}

async fn show(store: &LocalStore, output: OutputFormat, chat_id: &str) -> Result<()> {
    let chat = store
        .get_chat(chat_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Chat not found: {}", chat_id))?;
    let messages = store.get_chat_messages(chat_id).await?;

    if !output.is_text() {
        return output.print_value(&serde_json::json!({ "chat": chat, "messages": messages }));
    }

    print_field("ID", &chat.id);
    print_field("Title", chat.title.as_deref().unwrap_or("(untitled)"));
    print_field("Created", &chat.created_at.to_rfc3339());
    println!();
    for message in &messages {
        println!("[{}] {}\n", message.role, message.content);
    }
    Ok(())
}

async fn create(
    store: &LocalStore,
    output: OutputFormat,
    quiet: bool,
    title: Option<&str>,
) -> Result<()> {
    let chat = store.create_chat(title).await?;

    if !output.is_text() {
        return output.print_value(&chat);
    }
    if quiet {
        println!("{}", chat.id);
    } else {
        println!("Created chat: {}", chat.id);
    }
    Ok(())
}

async fn delete(store: &LocalStore, output: OutputFormat, quiet: bool, chat_id: &str) -> Result<()> {
    if !store.delete_chat(chat_id).await? {
        anyhow::bail!("Chat not found: {}", chat_id);
    }

    if !output.is_text() {
        output.print_value(&serde_json::json!({ "id": chat_id, "status": "deleted" }))?;
    } else if !quiet {
        println!("Deleted chat: {}", chat_id);
    }
    Ok(())
}
