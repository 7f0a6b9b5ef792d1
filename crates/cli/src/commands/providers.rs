// Provider management commands

use crate::client::{Client, ClientError};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use parley_core::{LlmProvider, LlmProviderKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum ProvidersCommand {
    /// List configured providers
    List,

    /// Register a provider
    Create {
        /// Provider name (matches the driver registry, e.g. openai)
        #[arg(long)]
        name: String,

        /// Human readable name
        #[arg(long)]
        display_name: Option<String>,

        /// official or openai_compatible
        #[arg(long, default_value = "official")]
        kind: LlmProviderKind,

        /// Endpoint override
        #[arg(long)]
        base_url: Option<String>,

        /// API key (stored encrypted, never shown again)
        #[arg(long, env = "PARLEY_PROVIDER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Replace the provider's models from the model database
    Refresh {
        /// Provider ID
        provider_id: Uuid,
    },

    /// Delete a provider and its models
    Delete {
        /// Provider ID
        provider_id: Uuid,
    },
}

#[derive(Debug, Serialize)]
struct CreateProviderRequest {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    kind: LlmProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshResponse {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

pub async fn run(
    command: ProvidersCommand,
    client: &Client,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    match command {
        ProvidersCommand::List => list(client, output).await,
        ProvidersCommand::Create {
            name,
            display_name,
            kind,
            base_url,
            api_key,
        } => {
            let request = CreateProviderRequest {
                name,
                display_name,
                kind,
                base_url,
                api_key,
            };
            create(client, output, quiet, request).await
        }
        ProvidersCommand::Refresh { provider_id } => refresh(client, output, provider_id).await,
        ProvidersCommand::Delete { provider_id } => delete(client, output, quiet, provider_id).await,
    }
}

fn not_found(provider_id: Uuid) -> impl FnOnce(ClientError) -> anyhow::Error {
    move |e| match e {
        ClientError::NotFound => anyhow::anyhow!("Provider not found: {}", provider_id),
        e => e.into(),
    }
}

async fn list(client: &Client, output: OutputFormat) -> Result<()> {
    let response: ListResponse<LlmProvider> = client.get("/v1/llm-providers").await?;

    if !output.is_text() {
        return output.print_value(&response.data);
    }
    if response.data.is_empty() {
        println!("No providers found");
        return Ok(());
    }

    print_table_header(&[
        ("ID", 36),
        ("NAME", 14),
        ("KIND", 18),
        ("KEY", 12),
        ("ENABLED", 7),
    ]);
    for provider in &response.data {
        print_table_row(&[
            (&provider.id.to_string(), 36),
            (&provider.name, 14),
            (&provider.kind.to_string(), 18),
            (provider.api_key_hint.as_deref().unwrap_or("-"), 12),
            (if provider.enabled { "yes" } else { "no" }, 7),
        ]);
    }
    Ok(())
}

async fn create(
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    request: CreateProviderRequest,
) -> Result<()> {
    let provider: LlmProvider = client.post("/v1/llm-providers", &request).await?;

    if !output.is_text() {
        return output.print_value(&provider);
    }
    if quiet {
        println!("{}", provider.id);
    } else {
        println!("Created provider: {}", provider.id);
        print_field("Name", &provider.name);
        print_field("Kind", &provider.kind.to_string());
        if let Some(hint) = &provider.api_key_hint {
            print_field("API key", hint);
        }
    }
    Ok(())
}

async fn refresh(client: &Client, output: OutputFormat, provider_id: Uuid) -> Result<()> {
    let response: RefreshResponse = client
        .post_empty(&format!("/v1/llm-providers/{}/refresh-models", provider_id))
        .await
        .map_err(not_found(provider_id))?;

    if !output.is_text() {
        return output.print_value(&response);
    }
    println!("Refreshed {} models", response.count);
    Ok(())
}

async fn delete(
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    provider_id: Uuid,
) -> Result<()> {
    client
        .delete(&format!("/v1/llm-providers/{}", provider_id))
        .await
        .map_err(not_found(provider_id))?;

    if !output.is_text() {
        output.print_value(&serde_json::json!({ "id": provider_id, "status": "deleted" }))?;
    } else if !quiet {
        println!("Deleted provider: {}", provider_id);
    }
    Ok(())
}
