// HTTP API routes
//
// This module contains all HTTP route handlers for the public API.
// Each submodule handles a specific resource type with its own AppState.

pub mod chat;
pub mod common;
pub mod llm_models;
pub mod llm_providers;
pub mod system_prompts;

// Re-export common types
pub use common::{error_response, ApiError, ErrorResponse, ListResponse};
