// OpenAPI specification generation
//
// This module defines the OpenAPI spec for the Parley API.
// It can be used by both the main API server (for Swagger UI)
// and the export-openapi binary (for static spec generation).

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use crate::config::SystemPrompt;
use crate::storage::VaultKeyMode;
use parley_core::{
    ChatRequest, ChatRequestMessage, ChatRole, LlmModel, LlmModelWithProvider, LlmProvider,
    LlmProviderKind, ModelCapabilities, ModelCost, ModelLifecycle, ModelMetadata, UiChunk,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Parley API
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::health,
        api::chat::chat,
        api::chat::resume_stream,
        api::system_prompts::list_system_prompts,
        api::llm_providers::create_provider,
        api::llm_providers::list_providers,
        api::llm_providers::get_provider,
        api::llm_providers::update_provider,
        api::llm_providers::delete_provider,
        api::llm_providers::refresh_models,
        api::llm_providers::list_provider_models,
        api::llm_models::list_models,
        api::llm_models::get_model,
        api::llm_models::update_model,
        api::llm_models::set_default_model,
        api::llm_models::delete_model,
    ),
    components(
        schemas(
            ErrorResponse,
            crate::HealthResponse, VaultKeyMode,
            // Chat types
            ChatRequest, ChatRequestMessage, ChatRole, UiChunk,
            SystemPrompt,
            ListResponse<SystemPrompt>,
            // Catalog types
            LlmProvider, LlmProviderKind,
            LlmModel, LlmModelWithProvider,
            ModelMetadata, ModelCapabilities, ModelCost, ModelLifecycle,
            api::llm_providers::CreateLlmProviderRequest,
            api::llm_providers::UpdateLlmProviderRequest,
            api::llm_providers::RefreshModelsResponse,
            api::llm_models::UpdateLlmModelRequest,
            ListResponse<LlmProvider>,
            ListResponse<LlmModel>,
            ListResponse<LlmModelWithProvider>,
        )
    ),
    tags(
        (name = "health", description = "Liveness and vault mode"),
        (name = "chat", description = "Streaming chat endpoints (SSE)"),
        (name = "llm-providers", description = "LLM Provider management endpoints"),
        (name = "llm-models", description = "LLM Model catalog endpoints")
    ),
    info(
        title = "Parley API",
        version = "0.1.0",
        description = "Provider catalog, credential vault and streaming chat for Parley",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_chat_and_catalog_paths() {
        let json: serde_json::Value = serde_json::from_str(&ApiDoc::to_json().unwrap()).unwrap();
        let paths = json["paths"].as_object().unwrap();
        for path in [
            "/health",
            "/v1/chat",
            "/v1/chat/{chat_id}/stream",
            "/v1/llm-providers",
            "/v1/llm-providers/{id}/refresh-models",
            "/v1/llm-models/{id}/default",
        ] {
            assert!(paths.contains_key(path), "missing {}", path);
        }
    }
}
