// Parley Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and HTTP-level tests
// Decision: Services are wired once here; main.rs only adds transport layers

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Environment configuration and system prompts
pub mod config;

// Services layer
pub mod services;

// Storage layer
pub mod storage;

// OpenAPI spec generation
pub mod openapi;

use axum::{extract::State, routing::get, Json, Router};
use parley_core::DriverRegistry;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::{ServerConfig, SystemPromptCatalog};
use crate::services::{
    ChatService, CompletionDispatcher, LlmModelService, LlmProviderService, ModelDatabaseSource,
    ModelSources, ModelsDevCache, StreamCheckpointStore,
};
use crate::storage::{CredentialVault, StorageBackend, VaultKeyMode};

/// Registry with every built-in vendor variant
pub fn default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    parley_openai::register_drivers(&mut registry);
    parley_anthropic::register_driver(&mut registry);
    parley_google::register_drivers(&mut registry);
    registry
}

/// Collaborators the server is built from
#[derive(Clone)]
pub struct AppContext {
    pub config: ServerConfig,
    pub db: Arc<StorageBackend>,
    pub vault: Arc<CredentialVault>,
    pub registry: Arc<DriverRegistry>,
    /// Remote model database (models.dev in production)
    pub model_source: Arc<dyn ModelDatabaseSource>,
    pub prompts: Arc<SystemPromptCatalog>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// "postgres" or "memory"
    pub storage: &'static str,
    pub vault_mode: VaultKeyMode,
}

#[derive(Clone)]
pub struct HealthState {
    storage: &'static str,
    vault_mode: VaultKeyMode,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.storage,
        vault_mode: state.vault_mode,
    })
}

/// Build the API router: health plus every `/v1` route
pub fn build_router(ctx: AppContext) -> Router {
    let cache = Arc::new(ModelsDevCache::new(
        ctx.model_source.clone(),
        ctx.config.model_db_cache_ttl,
    ));
    let sources = Arc::new(ModelSources::new(cache, ctx.registry.clone()));
    let models = Arc::new(LlmModelService::new(ctx.db.clone()));
    let providers = Arc::new(
        LlmProviderService::new(
            ctx.db.clone(),
            ctx.vault.clone(),
            models.clone(),
            sources,
            ctx.registry.clone(),
        )
        .with_ambient(ctx.config.ambient.clone()),
    );
    let dispatcher = Arc::new(
        CompletionDispatcher::new(
            ctx.db.clone(),
            ctx.vault.clone(),
            ctx.registry.clone(),
            ctx.config.ambient.clone(),
        )
        .with_default_max_output_tokens(ctx.config.default_max_output_tokens),
    );
    let checkpoints = Arc::new(StreamCheckpointStore::new(
        ctx.config.stream_checkpoint_retention,
    ));
    let chat = Arc::new(ChatService::new(
        dispatcher,
        ctx.prompts.clone(),
        checkpoints,
    ));

    let health_state = HealthState {
        storage: if ctx.db.is_dev_mode() {
            "memory"
        } else {
            "postgres"
        },
        vault_mode: ctx.vault.mode(),
    };

    Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(api::llm_providers::routes(api::llm_providers::AppState::new(
            providers, models.clone(),
        )))
        .merge(api::llm_models::routes(api::llm_models::AppState::new(
            models,
        )))
        .merge(api::chat::routes(api::chat::AppState::new(chat)))
        .merge(api::system_prompts::routes(
            api::system_prompts::AppState::new(ctx.prompts),
        ))
}
