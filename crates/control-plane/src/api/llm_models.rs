// LLM Model API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parley_core::LlmModelWithProvider;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{error_response, ApiError, ListResponse};
use crate::services::LlmModelService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LlmModelService>,
}

impl AppState {
    pub fn new(service: Arc<LlmModelService>) -> Self {
        Self { service }
    }
}

/// Request to update an LLM model. Only provided fields will be updated.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateLlmModelRequest {
    /// Human-readable display name for the model.
    #[serde(default)]
    #[schema(example = "GPT-4.1 Mini")]
    pub display_name: Option<String>,
    /// Disabled models are hidden from the chat picker and cannot be invoked.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Setting true makes this the single default model.
    #[serde(default)]
    #[schema(example = true)]
    pub is_default: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListModelsQuery {
    /// Include disabled models and models of disabled providers
    #[serde(default)]
    pub include_disabled: bool,
}

#[utoipa::path(
    get,
    path = "/v1/llm-models",
    params(ListModelsQuery),
    responses(
        (status = 200, description = "Catalog models across providers", body = ListResponse<LlmModelWithProvider>)
    ),
    tag = "llm-models"
)]
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ListModelsQuery>,
) -> Result<Json<ListResponse<LlmModelWithProvider>>, ApiError> {
    let models = if query.include_disabled {
        state.service.list_all().await
    } else {
        state.service.list_enabled().await
    }
    .map_err(error_response)?;
    Ok(Json(ListResponse::new(models)))
}

#[utoipa::path(
    get,
    path = "/v1/llm-models/{id}",
    params(
        ("id" = Uuid, Path, description = "Model ID")
    ),
    responses(
        (status = 200, description = "Model found", body = LlmModelWithProvider),
        (status = 404, description = "Model not found", body = super::ErrorResponse)
    ),
    tag = "llm-models"
)]
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LlmModelWithProvider>, ApiError> {
    let model = state.service.get(id).await.map_err(error_response)?;
    Ok(Json(model))
}

#[utoipa::path(
    patch,
    path = "/v1/llm-models/{id}",
    params(
        ("id" = Uuid, Path, description = "Model ID")
    ),
    request_body = UpdateLlmModelRequest,
    responses(
        (status = 200, description = "Model updated", body = LlmModelWithProvider),
        (status = 400, description = "Invalid request", body = super::ErrorResponse),
        (status = 404, description = "Model not found", body = super::ErrorResponse)
    ),
    tag = "llm-models"
)]
pub async fn update_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLlmModelRequest>,
) -> Result<Json<LlmModelWithProvider>, ApiError> {
    let model = state.service.update(id, req).await.map_err(error_response)?;
    Ok(Json(model))
}

#[utoipa::path(
    post,
    path = "/v1/llm-models/{id}/default",
    params(
        ("id" = Uuid, Path, description = "Model ID")
    ),
    responses(
        (status = 200, description = "Model is now the default", body = LlmModelWithProvider),
        (status = 404, description = "Model not found", body = super::ErrorResponse)
    ),
    tag = "llm-models"
)]
pub async fn set_default_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LlmModelWithProvider>, ApiError> {
    let model = state.service.set_default(id).await.map_err(error_response)?;
    Ok(Json(model))
}

#[utoipa::path(
    delete,
    path = "/v1/llm-models/{id}",
    params(
        ("id" = Uuid, Path, description = "Model ID")
    ),
    responses(
        (status = 204, description = "Model deleted"),
        (status = 404, description = "Model not found", body = super::ErrorResponse)
    ),
    tag = "llm-models"
)]
pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/llm-models", get(list_models))
        .route(
            "/v1/llm-models/:id",
            get(get_model).patch(update_model).delete(delete_model),
        )
        .route("/v1/llm-models/:id/default", post(set_default_model))
        .with_state(state)
}
