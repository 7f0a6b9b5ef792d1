// Model catalog commands

use crate::client::{Client, ClientError};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use parley_core::LlmModelWithProvider;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum ModelsCommand {
    /// List models
    List {
        /// Include disabled models
        #[arg(long)]
        all: bool,
    },

    /// Make a model the default for new chats
    SetDefault {
        /// Model ID
        model_id: Uuid,
    },
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

pub async fn run(command: ModelsCommand, client: &Client, output: OutputFormat) -> Result<()> {
    match command {
        ModelsCommand::List { all } => list(client, output, all).await,
        ModelsCommand::SetDefault { model_id } => set_default(client, output, model_id).await,
    }
}

async fn list(client: &Client, output: OutputFormat, all: bool) -> Result<()> {
    let path = if all {
        "/v1/llm-models?include_disabled=true"
    } else {
        "/v1/llm-models"
    };
    let response: ListResponse<LlmModelWithProvider> = client.get(path).await?;

    if !output.is_text() {
        return output.print_value(&response.data);
    }
    if response.data.is_empty() {
        println!("No models found. Refresh a provider with `parley providers refresh <id>`.");
        return Ok(());
    }

    print_table_header(&[
        ("ID", 36),
        ("PROVIDER", 12),
        ("MODEL", 28),
        ("CONTEXT", 9),
        ("FLAGS", 16),
    ]);
    for model in &response.data {
        let mut flags = Vec::new();
        if model.is_default {
            flags.push("default");
        }
        if !model.enabled {
            flags.push("disabled");
        }
        let context = model
            .metadata
            .context_window
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        print_table_row(&[
            (&model.id.to_string(), 36),
            (&model.provider_name, 12),
            (&model.model_id, 28),
            (&context, 9),
            (&flags.join(","), 16),
        ]);
    }
    Ok(())
}

async fn set_default(client: &Client, output: OutputFormat, model_id: Uuid) -> Result<()> {
    let model: serde_json::Value = client
        .post_empty(&format!("/v1/llm-models/{}/default", model_id))
        .await
        .map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("Model not found: {}", model_id),
            e => e.into(),
        })?;

    if !output.is_text() {
        return output.print_value(&model);
    }
    print_field("Default model", model["model_id"].as_str().unwrap_or("-"));
    print_field("ID", &model_id.to_string());
    Ok(())
}
