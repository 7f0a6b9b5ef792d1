// LLM Provider API endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parley_core::{LlmModel, LlmProvider, LlmProviderKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{error_response, ApiError, ListResponse};
use crate::services::{LlmModelService, LlmProviderService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LlmProviderService>,
    pub models: Arc<LlmModelService>,
}

impl AppState {
    pub fn new(service: Arc<LlmProviderService>, models: Arc<LlmModelService>) -> Self {
        Self { service, models }
    }
}

fn default_enabled() -> bool {
    true
}

/// Request to register an LLM provider
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateLlmProviderRequest {
    /// Unique provider key. Official providers use the registry name
    /// (e.g. "openai", "anthropic", "google").
    #[schema(example = "openai")]
    pub name: String,
    /// Human-readable name; defaults to `name`.
    #[serde(default)]
    #[schema(example = "OpenAI")]
    pub display_name: Option<String>,
    pub kind: LlmProviderKind,
    /// Endpoint override; required for openai_compatible providers.
    #[serde(default)]
    #[schema(example = "https://api.openai.com/v1")]
    pub base_url: Option<String>,
    /// API key. Encrypted at rest and never returned.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Request to update an LLM provider. Only provided fields are changed.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateLlmProviderRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub kind: Option<LlmProviderKind>,
    /// Empty string clears the override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// New API key. Empty string removes the stored key.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Result of a catalog refresh
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshModelsResponse {
    /// Number of models now in the provider's catalog
    #[schema(example = 12)]
    pub count: usize,
}

#[utoipa::path(
    post,
    path = "/v1/llm-providers",
    request_body = CreateLlmProviderRequest,
    responses(
        (status = 201, description = "Provider created", body = LlmProvider),
        (status = 400, description = "Invalid request", body = super::ErrorResponse),
        (status = 409, description = "Provider name already exists", body = super::ErrorResponse)
    ),
    tag = "llm-providers"
)]
pub async fn create_provider(
    State(state): State<AppState>,
    Json(req): Json<CreateLlmProviderRequest>,
) -> Result<(StatusCode, Json<LlmProvider>), ApiError> {
    let provider = state.service.create(req).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(provider)))
}

#[utoipa::path(
    get,
    path = "/v1/llm-providers",
    responses(
        (status = 200, description = "List of providers", body = ListResponse<LlmProvider>)
    ),
    tag = "llm-providers"
)]
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<LlmProvider>>, ApiError> {
    let providers = state.service.list().await.map_err(error_response)?;
    Ok(Json(ListResponse::new(providers)))
}

#[utoipa::path(
    get,
    path = "/v1/llm-providers/{id}",
    params(
        ("id" = Uuid, Path, description = "Provider ID")
    ),
    responses(
        (status = 200, description = "Provider found", body = LlmProvider),
        (status = 404, description = "Provider not found", body = super::ErrorResponse)
    ),
    tag = "llm-providers"
)]
pub async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LlmProvider>, ApiError> {
    let provider = state.service.get(id).await.map_err(error_response)?;
    Ok(Json(provider))
}

#[utoipa::path(
    patch,
    path = "/v1/llm-providers/{id}",
    params(
        ("id" = Uuid, Path, description = "Provider ID")
    ),
    request_body = UpdateLlmProviderRequest,
    responses(
        (status = 200, description = "Provider updated", body = LlmProvider),
        (status = 404, description = "Provider not found", body = super::ErrorResponse)
    ),
    tag = "llm-providers"
)]
pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLlmProviderRequest>,
) -> Result<Json<LlmProvider>, ApiError> {
    let provider = state.service.update(id, req).await.map_err(error_response)?;
    Ok(Json(provider))
}

#[utoipa::path(
    delete,
    path = "/v1/llm-providers/{id}",
    params(
        ("id" = Uuid, Path, description = "Provider ID")
    ),
    responses(
        (status = 204, description = "Provider and its models deleted"),
        (status = 404, description = "Provider not found", body = super::ErrorResponse)
    ),
    tag = "llm-providers"
)]
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/llm-providers/{id}/refresh-models",
    params(
        ("id" = Uuid, Path, description = "Provider ID")
    ),
    responses(
        (status = 200, description = "Catalog replaced", body = RefreshModelsResponse),
        (status = 404, description = "Provider not found", body = super::ErrorResponse),
        (status = 422, description = "Provider is unconfigured or misconfigured", body = super::ErrorResponse),
        (status = 500, description = "Stored credential could not be decrypted", body = super::ErrorResponse),
        (status = 502, description = "Model source unavailable", body = super::ErrorResponse)
    ),
    tag = "llm-providers"
)]
pub async fn refresh_models(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefreshModelsResponse>, ApiError> {
    let count = state
        .service
        .refresh_models(id)
        .await
        .map_err(error_response)?;
    Ok(Json(RefreshModelsResponse { count }))
}

#[utoipa::path(
    get,
    path = "/v1/llm-providers/{id}/models",
    params(
        ("id" = Uuid, Path, description = "Provider ID")
    ),
    responses(
        (status = 200, description = "Provider's models, enabled or not", body = ListResponse<LlmModel>),
        (status = 404, description = "Provider not found", body = super::ErrorResponse)
    ),
    tag = "llm-providers"
)]
pub async fn list_provider_models(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListResponse<LlmModel>>, ApiError> {
    let models = state
        .models
        .list_for_provider(id)
        .await
        .map_err(error_response)?;
    Ok(Json(ListResponse::new(models)))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/llm-providers",
            get(list_providers).post(create_provider),
        )
        .route(
            "/v1/llm-providers/:id",
            get(get_provider)
                .patch(update_provider)
                .delete(delete_provider),
        )
        .route("/v1/llm-providers/:id/refresh-models", post(refresh_models))
        .route("/v1/llm-providers/:id/models", get(list_provider_models))
        .with_state(state)
}
