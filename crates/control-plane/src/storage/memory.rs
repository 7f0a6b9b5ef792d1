// In-memory storage implementation for dev mode
// Decision: Use parking_lot for thread-safe access
// Decision: UUIDs generated via uuid v7 (time-ordered)
//
// Mirrors the PostgreSQL repository, including the name uniqueness, the
// provider -> models cascade and the single-default rule.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::*;

/// In-memory database for dev mode
/// All data is stored in memory and lost on restart
#[derive(Default)]
pub struct InMemoryDatabase {
    llm_providers: RwLock<HashMap<Uuid, LlmProviderRow>>,
    llm_models: RwLock<HashMap<Uuid, LlmModelRow>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn join(model: &LlmModelRow, provider: &LlmProviderRow) -> LlmModelWithProviderRow {
        LlmModelWithProviderRow {
            id: model.id,
            provider_id: model.provider_id,
            model_id: model.model_id.clone(),
            display_name: model.display_name.clone(),
            enabled: model.enabled,
            is_default: model.is_default,
            metadata: model.metadata.clone(),
            created_at: model.created_at,
            updated_at: model.updated_at,
            provider_name: provider.name.clone(),
            provider_display_name: provider.display_name.clone(),
            provider_kind: provider.kind.clone(),
            provider_enabled: provider.enabled,
        }
    }

    /// Default first, then provider name, then display name
    fn sort_models(models: &mut [LlmModelWithProviderRow]) {
        models.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| a.provider_name.cmp(&b.provider_name))
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
    }

    // ============================================
    // LLM Providers
    // ============================================

    pub async fn create_llm_provider(&self, input: CreateLlmProviderRow) -> Result<LlmProviderRow> {
        let mut providers = self.llm_providers.write();
        if providers.values().any(|p| p.name == input.name) {
            bail!("duplicate key value violates unique constraint: llm_providers.name");
        }

        let now = Self::now();
        let id = Uuid::now_v7();
        let (ciphertext, iv, tag, hint) = match input.credential {
            Some(c) => (
                Some(c.secret.ciphertext),
                Some(c.secret.iv),
                Some(c.secret.auth_tag),
                Some(c.hint),
            ),
            None => (None, None, None, None),
        };
        let row = LlmProviderRow {
            id,
            name: input.name,
            display_name: input.display_name,
            kind: input.kind,
            base_url: input.base_url,
            api_key_ciphertext: ciphertext,
            api_key_iv: iv,
            api_key_tag: tag,
            api_key_hint: hint,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };
        providers.insert(id, row.clone());
        Ok(row)
    }

    pub async fn get_llm_provider(&self, id: Uuid) -> Result<Option<LlmProviderRow>> {
        Ok(self.llm_providers.read().get(&id).cloned())
    }

    pub async fn get_llm_provider_by_name(&self, name: &str) -> Result<Option<LlmProviderRow>> {
        Ok(self
            .llm_providers
            .read()
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    pub async fn list_llm_providers(&self) -> Result<Vec<LlmProviderRow>> {
        let providers = self.llm_providers.read();
        let mut result: Vec<_> = providers.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    pub async fn update_llm_provider(
        &self,
        id: Uuid,
        input: UpdateLlmProviderRow,
    ) -> Result<Option<LlmProviderRow>> {
        let mut providers = self.llm_providers.write();
        let Some(provider) = providers.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(display_name) = input.display_name {
            provider.display_name = display_name;
        }
        if let Some(kind) = input.kind {
            provider.kind = kind;
        }
        if let Some(base_url) = input.base_url {
            provider.base_url = base_url;
        }
        if let Some(enabled) = input.enabled {
            provider.enabled = enabled;
        }
        match input.credential {
            CredentialUpdate::Keep => {}
            CredentialUpdate::Set(c) => {
                provider.api_key_ciphertext = Some(c.secret.ciphertext);
                provider.api_key_iv = Some(c.secret.iv);
                provider.api_key_tag = Some(c.secret.auth_tag);
                provider.api_key_hint = Some(c.hint);
            }
            CredentialUpdate::Clear => {
                provider.api_key_ciphertext = None;
                provider.api_key_iv = None;
                provider.api_key_tag = None;
                provider.api_key_hint = None;
            }
        }
        provider.updated_at = Self::now();
        Ok(Some(provider.clone()))
    }

    pub async fn delete_llm_provider(&self, id: Uuid) -> Result<bool> {
        let mut providers = self.llm_providers.write();
        let mut models = self.llm_models.write();
        if providers.remove(&id).is_none() {
            return Ok(false);
        }
        models.retain(|_, m| m.provider_id != id);
        Ok(true)
    }

    // ============================================
    // LLM Models
    // ============================================

    pub async fn list_enabled_llm_models(&self) -> Result<Vec<LlmModelWithProviderRow>> {
        let providers = self.llm_providers.read();
        let models = self.llm_models.read();

        let mut result: Vec<_> = models
            .values()
            .filter(|m| m.enabled)
            .filter_map(|m| {
                providers
                    .get(&m.provider_id)
                    .filter(|p| p.enabled)
                    .map(|p| Self::join(m, p))
            })
            .collect();
        Self::sort_models(&mut result);
        Ok(result)
    }

    pub async fn list_all_llm_models(&self) -> Result<Vec<LlmModelWithProviderRow>> {
        let providers = self.llm_providers.read();
        let models = self.llm_models.read();

        let mut result: Vec<_> = models
            .values()
            .filter_map(|m| providers.get(&m.provider_id).map(|p| Self::join(m, p)))
            .collect();
        Self::sort_models(&mut result);
        Ok(result)
    }

    pub async fn list_llm_models_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<LlmModelRow>> {
        let models = self.llm_models.read();
        let mut result: Vec<_> = models
            .values()
            .filter(|m| m.provider_id == provider_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(result)
    }

    pub async fn get_llm_model_with_provider(
        &self,
        id: Uuid,
    ) -> Result<Option<LlmModelWithProviderRow>> {
        let providers = self.llm_providers.read();
        let models = self.llm_models.read();

        Ok(models
            .get(&id)
            .and_then(|m| providers.get(&m.provider_id).map(|p| Self::join(m, p))))
    }

    pub async fn get_invocable_model(&self, id: Uuid) -> Result<Option<InvocableModelRow>> {
        let providers = self.llm_providers.read();
        let models = self.llm_models.read();

        let Some(model) = models.get(&id).filter(|m| m.enabled) else {
            return Ok(None);
        };
        let Some(provider) = providers.get(&model.provider_id).filter(|p| p.enabled) else {
            return Ok(None);
        };

        Ok(Some(InvocableModelRow {
            id: model.id,
            model_id: model.model_id.clone(),
            metadata: model.metadata.clone(),
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            provider_kind: provider.kind.clone(),
            provider_base_url: provider.base_url.clone(),
            api_key_ciphertext: provider.api_key_ciphertext.clone(),
            api_key_iv: provider.api_key_iv.clone(),
            api_key_tag: provider.api_key_tag.clone(),
        }))
    }

    pub async fn replace_llm_models_for_provider(
        &self,
        provider_id: Uuid,
        new_models: Vec<NewLlmModelRow>,
    ) -> Result<usize> {
        // Build the replacement set before touching the map so a failure
        // leaves the prior set in place
        let now = Self::now();
        let mut rows = Vec::with_capacity(new_models.len());
        for model in &new_models {
            rows.push(LlmModelRow {
                id: Uuid::now_v7(),
                provider_id,
                model_id: model.model_id.clone(),
                display_name: model.display_name.clone(),
                enabled: true,
                is_default: false,
                metadata: serde_json::to_value(&model.metadata)?,
                created_at: now,
                updated_at: now,
            });
        }

        let mut models = self.llm_models.write();
        let previous_default = models
            .values()
            .find(|m| m.provider_id == provider_id && m.is_default)
            .map(|m| m.model_id.clone());

        models.retain(|_, m| m.provider_id != provider_id);
        for mut row in rows {
            row.is_default = previous_default.as_deref() == Some(row.model_id.as_str());
            models.insert(row.id, row);
        }
        Ok(new_models.len())
    }

    pub async fn set_default_llm_model(&self, id: Uuid) -> Result<bool> {
        let mut models = self.llm_models.write();
        if !models.contains_key(&id) {
            return Ok(false);
        }
        let now = Self::now();
        for model in models.values_mut() {
            let should_be_default = model.id == id;
            if model.is_default != should_be_default {
                model.is_default = should_be_default;
                model.updated_at = now;
            }
        }
        Ok(true)
    }

    pub async fn update_llm_model(
        &self,
        id: Uuid,
        input: UpdateLlmModelRow,
    ) -> Result<Option<LlmModelRow>> {
        let mut models = self.llm_models.write();
        let Some(model) = models.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(display_name) = input.display_name {
            model.display_name = display_name;
        }
        if let Some(enabled) = input.enabled {
            model.enabled = enabled;
        }
        if input.is_default == Some(false) {
            model.is_default = false;
        }
        model.updated_at = Self::now();
        Ok(Some(model.clone()))
    }

    pub async fn delete_llm_model(&self, id: Uuid) -> Result<bool> {
        Ok(self.llm_models.write().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::encryption::{CredentialVault, EncryptedSecret};
    use parley_core::ModelMetadata;

    fn provider_input(name: &str) -> CreateLlmProviderRow {
        CreateLlmProviderRow {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            kind: "official".to_string(),
            base_url: None,
            credential: None,
            enabled: true,
        }
    }

    fn new_model(model_id: &str) -> NewLlmModelRow {
        NewLlmModelRow {
            model_id: model_id.to_string(),
            display_name: model_id.to_string(),
            metadata: ModelMetadata::default(),
        }
    }

    async fn seed(db: &InMemoryDatabase, name: &str, models: &[&str]) -> LlmProviderRow {
        let provider = db.create_llm_provider(provider_input(name)).await.unwrap();
        db.replace_llm_models_for_provider(
            provider.id,
            models.iter().map(|m| new_model(m)).collect(),
        )
        .await
        .unwrap();
        provider
    }

    async fn model_id_of(db: &InMemoryDatabase, native: &str) -> Uuid {
        db.list_all_llm_models()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.model_id == native)
            .map(|m| m.id)
            .unwrap()
    }

    fn default_count(models: &[LlmModelWithProviderRow]) -> usize {
        models.iter().filter(|m| m.is_default).count()
    }

    #[tokio::test]
    async fn test_provider_names_are_unique() {
        let db = InMemoryDatabase::new();
        db.create_llm_provider(provider_input("openai")).await.unwrap();
        assert!(db.create_llm_provider(provider_input("openai")).await.is_err());
        assert_eq!(db.list_llm_providers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_default_across_swaps() {
        let db = InMemoryDatabase::new();
        seed(&db, "openai", &["gpt-4.1", "gpt-4.1-mini"]).await;
        seed(&db, "anthropic", &["claude-sonnet-4"]).await;

        for native in ["gpt-4.1", "claude-sonnet-4", "gpt-4.1-mini", "gpt-4.1"] {
            let id = model_id_of(&db, native).await;
            assert!(db.set_default_llm_model(id).await.unwrap());
            let all = db.list_all_llm_models().await.unwrap();
            assert_eq!(default_count(&all), 1);
            assert_eq!(all[0].id, id, "default is listed first");
        }

        assert!(!db.set_default_llm_model(Uuid::now_v7()).await.unwrap());
        assert_eq!(default_count(&db.list_all_llm_models().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_clearing_default_touches_only_that_row() {
        let db = InMemoryDatabase::new();
        seed(&db, "openai", &["gpt-4.1", "gpt-4.1-mini"]).await;
        let id = model_id_of(&db, "gpt-4.1").await;
        db.set_default_llm_model(id).await.unwrap();

        let other = model_id_of(&db, "gpt-4.1-mini").await;
        db.update_llm_model(
            other,
            UpdateLlmModelRow {
                is_default: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(default_count(&db.list_all_llm_models().await.unwrap()), 1);

        db.update_llm_model(
            id,
            UpdateLlmModelRow {
                is_default: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(default_count(&db.list_all_llm_models().await.unwrap()), 0);
    }

    #[tokio::test]
    async fn test_delete_provider_cascades_to_models() {
        let db = InMemoryDatabase::new();
        let openai = seed(&db, "openai", &["gpt-4.1", "gpt-4.1-mini"]).await;
        seed(&db, "anthropic", &["claude-sonnet-4"]).await;

        assert!(db.delete_llm_provider(openai.id).await.unwrap());

        let remaining = db.list_all_llm_models().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|m| m.provider_id != openai.id));
        assert!(db
            .list_llm_models_for_provider(openai.id)
            .await
            .unwrap()
            .is_empty());
        assert!(!db.delete_llm_provider(openai.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_visibility_over_enabled_flags() {
        for (provider_enabled, model_enabled) in
            [(true, true), (true, false), (false, true), (false, false)]
        {
            let db = InMemoryDatabase::new();
            let provider = seed(&db, "groq", &["llama-3.3-70b"]).await;
            let model = model_id_of(&db, "llama-3.3-70b").await;

            db.update_llm_provider(
                provider.id,
                UpdateLlmProviderRow {
                    enabled: Some(provider_enabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            db.update_llm_model(
                model,
                UpdateLlmModelRow {
                    enabled: Some(model_enabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

            let visible = provider_enabled && model_enabled;
            let listed = db.list_enabled_llm_models().await.unwrap();
            assert_eq!(listed.len() == 1, visible);
            assert_eq!(db.get_invocable_model(model).await.unwrap().is_some(), visible);
            assert_eq!(db.list_all_llm_models().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_replace_keeps_default_when_native_id_survives() {
        let db = InMemoryDatabase::new();
        let provider = seed(&db, "openai", &["gpt-4.1", "gpt-4o"]).await;
        let id = model_id_of(&db, "gpt-4.1").await;
        db.set_default_llm_model(id).await.unwrap();

        db.replace_llm_models_for_provider(provider.id, vec![new_model("gpt-4.1"), new_model("o3")])
            .await
            .unwrap();
        let all = db.list_all_llm_models().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].model_id, "gpt-4.1");
        assert!(all[0].is_default);

        db.replace_llm_models_for_provider(provider.id, vec![new_model("o3")])
            .await
            .unwrap();
        assert_eq!(default_count(&db.list_all_llm_models().await.unwrap()), 0);
    }

    #[tokio::test]
    async fn test_credential_rotation_and_clear() {
        let db = InMemoryDatabase::new();
        let vault = CredentialVault::ephemeral();
        let provider = db.create_llm_provider(provider_input("openai")).await.unwrap();
        assert!(!provider.api_key_set());

        let first: EncryptedSecret = vault.encrypt("sk-first-key-000000").unwrap();
        let updated = db
            .update_llm_provider(
                provider.id,
                UpdateLlmProviderRow {
                    credential: CredentialUpdate::Set(StoredCredential {
                        secret: first.clone(),
                        hint: "sk-f...0000".to_string(),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.credential(), Some(first.clone()));
        assert_eq!(vault.decrypt(&first).unwrap(), "sk-first-key-000000");

        let cleared = db
            .update_llm_provider(
                provider.id,
                UpdateLlmProviderRow {
                    credential: CredentialUpdate::Clear,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.credential().is_none());
        assert!(cleared.api_key_hint.is_none());
    }
}
