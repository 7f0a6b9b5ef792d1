// LLM Model service for business logic
//
// The catalog is derived data: rows are replaced wholesale on refresh and
// only the display name, enabled flag and default flag are edited by hand.
// Public listings only ever see enabled models of enabled providers.

use crate::storage::{
    parse_metadata, LlmModelRow, NewLlmModelRow, StorageBackend, UpdateLlmModelRow,
};
use parley_core::{LlmModel, LlmModelWithProvider, ModelDescriptor, ParleyError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::llm_models::UpdateLlmModelRequest;

pub struct LlmModelService {
    db: Arc<StorageBackend>,
}

impl LlmModelService {
    pub fn new(db: Arc<StorageBackend>) -> Self {
        Self { db }
    }

    /// Enabled models of enabled providers, default first
    pub async fn list_enabled(&self) -> Result<Vec<LlmModelWithProvider>> {
        let rows = self.db.list_enabled_llm_models().await?;
        Ok(rows.into_iter().map(|r| r.into_model()).collect())
    }

    /// Every model, including disabled ones (admin)
    pub async fn list_all(&self) -> Result<Vec<LlmModelWithProvider>> {
        let rows = self.db.list_all_llm_models().await?;
        Ok(rows.into_iter().map(|r| r.into_model()).collect())
    }

    pub async fn list_for_provider(&self, provider_id: Uuid) -> Result<Vec<LlmModel>> {
        if self.db.get_llm_provider(provider_id).await?.is_none() {
            return Err(ParleyError::provider_not_found(provider_id));
        }
        let rows = self.db.list_llm_models_for_provider(provider_id).await?;
        Ok(rows.iter().map(Self::row_to_model).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<LlmModelWithProvider> {
        self.db
            .get_llm_model_with_provider(id)
            .await?
            .map(|r| r.into_model())
            .ok_or_else(|| ParleyError::model_not_found(id.to_string()))
    }

    /// Replace a provider's catalog in one transaction
    ///
    /// Duplicate native ids collapse to their first occurrence. Returns the
    /// number of models stored.
    pub async fn replace_models_for_provider(
        &self,
        provider_id: Uuid,
        descriptors: Vec<ModelDescriptor>,
    ) -> Result<usize> {
        if self.db.get_llm_provider(provider_id).await?.is_none() {
            return Err(ParleyError::provider_not_found(provider_id));
        }

        let mut seen = HashSet::new();
        let models: Vec<NewLlmModelRow> = descriptors
            .into_iter()
            .filter(|d| seen.insert(d.model_id.clone()))
            .map(|d| NewLlmModelRow {
                model_id: d.model_id,
                display_name: d.display_name,
                metadata: d.metadata,
            })
            .collect();

        let count = self
            .db
            .replace_llm_models_for_provider(provider_id, models)
            .await?;
        tracing::info!(provider_id = %provider_id, count, "Replaced provider model catalog");
        Ok(count)
    }

    /// Make a model the single default
    pub async fn set_default(&self, id: Uuid) -> Result<LlmModelWithProvider> {
        if !self.db.set_default_llm_model(id).await? {
            return Err(ParleyError::model_not_found(id.to_string()));
        }
        self.get(id).await
    }

    pub async fn update(
        &self,
        id: Uuid,
        req: UpdateLlmModelRequest,
    ) -> Result<LlmModelWithProvider> {
        if let Some(display_name) = &req.display_name {
            if display_name.trim().is_empty() {
                return Err(ParleyError::validation("display_name must not be empty"));
            }
        }

        let input = UpdateLlmModelRow {
            display_name: req.display_name,
            enabled: req.enabled,
            // Some(true) goes through set_default so the swap is transactional
            is_default: req.is_default.filter(|d| !d),
        };
        if self.db.update_llm_model(id, input).await?.is_none() {
            return Err(ParleyError::model_not_found(id.to_string()));
        }

        if req.is_default == Some(true) {
            return self.set_default(id).await;
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.db.delete_llm_model(id).await? {
            return Err(ParleyError::model_not_found(id.to_string()));
        }
        Ok(())
    }

    fn row_to_model(row: &LlmModelRow) -> LlmModel {
        LlmModel {
            id: row.id,
            provider_id: row.provider_id,
            model_id: row.model_id.clone(),
            display_name: row.display_name.clone(),
            enabled: row.enabled,
            is_default: row.is_default,
            metadata: parse_metadata(&row.metadata),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
