// Chat commands: send a message or resume a turn, streaming tokens to stdout

use crate::client::Client;
use crate::output::OutputFormat;
use anyhow::Result;
use parley_client::{
    ChatStreamController, HttpChatTransport, LocalStore, ResumeOutcome, TurnStatus,
};
use std::io::Write;
use std::sync::Arc;

pub struct SendArgs {
    pub chat_id: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub message: String,
}

pub async fn send(
    store: &LocalStore,
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    args: SendArgs,
) -> Result<()> {
    let chat_id = match args.chat_id {
        Some(id) => {
            if store.get_chat(&id).await?.is_none() {
                anyhow::bail!("Chat not found: {}", id);
            }
            id
        }
        None => {
            let chat = store.create_chat(None).await?;
            if !quiet && output.is_text() {
                eprintln!("Created chat: {}", chat.id);
            }
            chat.id
        }
    };

    let controller = ChatStreamController::with_system_prompt(
        store.clone(),
        Arc::new(HttpChatTransport::new(client.base_url())?),
        chat_id,
        args.model,
        args.system_prompt,
    );

    controller.send(args.message)?;
    stream_turn(&controller, output).await
}

pub async fn resume(
    store: &LocalStore,
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    chat_id: String,
) -> Result<()> {
    // The model is only needed for new turns
    let controller = ChatStreamController::new(
        store.clone(),
        Arc::new(HttpChatTransport::new(client.base_url())?),
        chat_id,
        String::new(),
    );

    match controller.resume_stream().await? {
        ResumeOutcome::Resumed => stream_turn(&controller, output).await,
        ResumeOutcome::NoContent => {
            if !quiet && output.is_text() {
                eprintln!("Nothing to resume for chat {}", controller.chat_id());
            }
            Ok(())
        }
    }
}

/// Print the turn as it streams; Ctrl-C stops it
async fn stream_turn(controller: &ChatStreamController, output: OutputFormat) -> Result<()> {
    let mut status = controller.subscribe_status();
    let mut draft = controller.subscribe_draft();
    let mut printed = 0;

    loop {
        if !status.borrow_and_update().is_active() {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.stop();
                break;
            }
            changed = draft.changed() => {
                if changed.is_err() {
                    break;
                }
                if output.is_text() {
                    printed = print_new_text(&draft.borrow_and_update(), printed)?;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    controller.wait().await;

    if output.is_text() {
        if controller.status() == TurnStatus::Finished {
            print_new_text(&draft.borrow(), printed)?;
        }
        println!();
    } else {
        output.print_value(&serde_json::json!({
            "chat_id": controller.chat_id(),
            "status": controller.status(),
            "text": draft.borrow().clone(),
            "error": controller.error(),
        }))?;
    }

    if let Some(save_error) = controller.save_error() {
        tracing::warn!(error = %save_error, "Chat history was not fully saved");
    }
    match controller.status() {
        TurnStatus::Errored => {
            anyhow::bail!(
                "Turn failed: {}",
                controller.error().unwrap_or_else(|| "unknown error".to_string())
            )
        }
        TurnStatus::Stopped => {
            eprintln!("Stopped");
            Ok(())
        }
        _ => Ok(()),
    }
}

fn print_new_text(text: &str, printed: usize) -> Result<usize> {
    if let Some(new) = text.get(printed..) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(new.as_bytes())?;
        stdout.flush()?;
    }
    Ok(text.len())
}
