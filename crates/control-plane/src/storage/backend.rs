// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// A unified StorageBackend enum that works with either PostgreSQL
// (production) or in-memory (dev mode) storage.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::memory::InMemoryDatabase;
use super::models::*;
use super::repositories::Database;

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory database (dev mode)
    InMemory(Arc<InMemoryDatabase>),
}

impl StorageBackend {
    /// Create a PostgreSQL storage backend from a database URL
    pub async fn postgres(database_url: &str) -> Result<Self> {
        let db = Database::from_url(database_url).await?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryDatabase::new()))
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Get the PostgreSQL pool if using PostgreSQL backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }

    // ============================================
    // LLM Providers
    // ============================================

    pub async fn create_llm_provider(&self, input: CreateLlmProviderRow) -> Result<LlmProviderRow> {
        match self {
            Self::Postgres(db) => db.create_llm_provider(input).await,
            Self::InMemory(db) => db.create_llm_provider(input).await,
        }
    }

    pub async fn get_llm_provider(&self, id: Uuid) -> Result<Option<LlmProviderRow>> {
        match self {
            Self::Postgres(db) => db.get_llm_provider(id).await,
            Self::InMemory(db) => db.get_llm_provider(id).await,
        }
    }

    pub async fn get_llm_provider_by_name(&self, name: &str) -> Result<Option<LlmProviderRow>> {
        match self {
            Self::Postgres(db) => db.get_llm_provider_by_name(name).await,
            Self::InMemory(db) => db.get_llm_provider_by_name(name).await,
        }
    }

    pub async fn list_llm_providers(&self) -> Result<Vec<LlmProviderRow>> {
        match self {
            Self::Postgres(db) => db.list_llm_providers().await,
            Self::InMemory(db) => db.list_llm_providers().await,
        }
    }

    pub async fn update_llm_provider(
        &self,
        id: Uuid,
        input: UpdateLlmProviderRow,
    ) -> Result<Option<LlmProviderRow>> {
        match self {
            Self::Postgres(db) => db.update_llm_provider(id, input).await,
            Self::InMemory(db) => db.update_llm_provider(id, input).await,
        }
    }

    pub async fn delete_llm_provider(&self, id: Uuid) -> Result<bool> {
        match self {
            Self::Postgres(db) => db.delete_llm_provider(id).await,
            Self::InMemory(db) => db.delete_llm_provider(id).await,
        }
    }

    // ============================================
    // LLM Models
    // ============================================

    pub async fn list_enabled_llm_models(&self) -> Result<Vec<LlmModelWithProviderRow>> {
        match self {
            Self::Postgres(db) => db.list_enabled_llm_models().await,
            Self::InMemory(db) => db.list_enabled_llm_models().await,
        }
    }

    pub async fn list_all_llm_models(&self) -> Result<Vec<LlmModelWithProviderRow>> {
        match self {
            Self::Postgres(db) => db.list_all_llm_models().await,
            Self::InMemory(db) => db.list_all_llm_models().await,
        }
    }

    pub async fn list_llm_models_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<LlmModelRow>> {
        match self {
            Self::Postgres(db) => db.list_llm_models_for_provider(provider_id).await,
            Self::InMemory(db) => db.list_llm_models_for_provider(provider_id).await,
        }
    }

    pub async fn get_llm_model_with_provider(
        &self,
        id: Uuid,
    ) -> Result<Option<LlmModelWithProviderRow>> {
        match self {
            Self::Postgres(db) => db.get_llm_model_with_provider(id).await,
            Self::InMemory(db) => db.get_llm_model_with_provider(id).await,
        }
    }

    pub async fn get_invocable_model(&self, id: Uuid) -> Result<Option<InvocableModelRow>> {
        match self {
            Self::Postgres(db) => db.get_invocable_model(id).await,
            Self::InMemory(db) => db.get_invocable_model(id).await,
        }
    }

    pub async fn replace_llm_models_for_provider(
        &self,
        provider_id: Uuid,
        models: Vec<NewLlmModelRow>,
    ) -> Result<usize> {
        match self {
            Self::Postgres(db) => db.replace_llm_models_for_provider(provider_id, models).await,
            Self::InMemory(db) => db.replace_llm_models_for_provider(provider_id, models).await,
        }
    }

    pub async fn set_default_llm_model(&self, id: Uuid) -> Result<bool> {
        match self {
            Self::Postgres(db) => db.set_default_llm_model(id).await,
            Self::InMemory(db) => db.set_default_llm_model(id).await,
        }
    }

    pub async fn update_llm_model(
        &self,
        id: Uuid,
        input: UpdateLlmModelRow,
    ) -> Result<Option<LlmModelRow>> {
        match self {
            Self::Postgres(db) => db.update_llm_model(id, input).await,
            Self::InMemory(db) => db.update_llm_model(id, input).await,
        }
    }

    pub async fn delete_llm_model(&self, id: Uuid) -> Result<bool> {
        match self {
            Self::Postgres(db) => db.delete_llm_model(id).await,
            Self::InMemory(db) => db.delete_llm_model(id).await,
        }
    }
}
