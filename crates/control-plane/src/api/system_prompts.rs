// System prompt API endpoints

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;

use super::common::ListResponse;
use crate::config::{SystemPrompt, SystemPromptCatalog};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<SystemPromptCatalog>,
}

impl AppState {
    pub fn new(catalog: Arc<SystemPromptCatalog>) -> Self {
        Self { catalog }
    }
}

#[utoipa::path(
    get,
    path = "/v1/system-prompts",
    responses(
        (status = 200, description = "Selectable system prompts", body = ListResponse<SystemPrompt>)
    ),
    tag = "chat"
)]
pub async fn list_system_prompts(
    State(state): State<AppState>,
) -> Json<ListResponse<SystemPrompt>> {
    Json(ListResponse::new(state.catalog.list().to_vec()))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/system-prompts", get(list_system_prompts))
        .with_state(state)
}
