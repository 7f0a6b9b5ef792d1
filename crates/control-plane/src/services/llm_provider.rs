// LLM Provider service for business logic
//
// API keys are encrypted the moment they arrive and only the masked hint is
// ever returned. Decryption happens here only to refresh a provider's models,
// which first checks that a client can actually be built for the provider.

use crate::storage::{
    mask, CreateLlmProviderRow, CredentialUpdate, CredentialVault, LlmProviderRow,
    StorageBackend, StoredCredential, UpdateLlmProviderRow,
};
use parley_core::{AmbientConfig, ClientOptions, DriverRegistry, LlmProvider, ParleyError, Result};
use std::sync::Arc;
use uuid::Uuid;

use super::dispatcher::parse_kind;
use super::llm_model::LlmModelService;
use super::model_sources::ModelSources;
use crate::api::llm_providers::{CreateLlmProviderRequest, UpdateLlmProviderRequest};

pub struct LlmProviderService {
    db: Arc<StorageBackend>,
    vault: Arc<CredentialVault>,
    models: Arc<LlmModelService>,
    sources: Arc<ModelSources>,
    registry: Arc<DriverRegistry>,
    ambient: AmbientConfig,
}

impl LlmProviderService {
    pub fn new(
        db: Arc<StorageBackend>,
        vault: Arc<CredentialVault>,
        models: Arc<LlmModelService>,
        sources: Arc<ModelSources>,
        registry: Arc<DriverRegistry>,
    ) -> Self {
        Self {
            db,
            vault,
            models,
            sources,
            registry,
            ambient: AmbientConfig::default(),
        }
    }

    /// Ambient settings used when checking that a provider can be served
    pub fn with_ambient(mut self, ambient: AmbientConfig) -> Self {
        self.ambient = ambient;
        self
    }

    pub async fn create(&self, req: CreateLlmProviderRequest) -> Result<LlmProvider> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(ParleyError::validation("name must not be empty"));
        }
        if self.db.get_llm_provider_by_name(&name).await?.is_some() {
            return Err(ParleyError::conflict(format!(
                "Provider '{}' already exists",
                name
            )));
        }

        let credential = match req.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(self.seal(key)?),
            _ => None,
        };

        let input = CreateLlmProviderRow {
            display_name: req
                .display_name
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| name.clone()),
            name: name.clone(),
            kind: req.kind.to_string(),
            base_url: req.base_url.filter(|u| !u.trim().is_empty()),
            credential,
            enabled: req.enabled,
        };

        let row = self.db.create_llm_provider(input).await.map_err(|e| {
            if is_unique_violation(&e) {
                ParleyError::conflict(format!("Provider '{}' already exists", name))
            } else {
                ParleyError::Internal(e)
            }
        })?;
        tracing::info!(provider_id = %row.id, provider = %row.name, "Created LLM provider");
        Ok(Self::row_to_provider(&row))
    }

    pub async fn get(&self, id: Uuid) -> Result<LlmProvider> {
        let row = self.load(id).await?;
        Ok(Self::row_to_provider(&row))
    }

    pub async fn list(&self) -> Result<Vec<LlmProvider>> {
        let rows = self.db.list_llm_providers().await?;
        Ok(rows.iter().map(Self::row_to_provider).collect())
    }

    pub async fn update(&self, id: Uuid, req: UpdateLlmProviderRequest) -> Result<LlmProvider> {
        // Empty string clears the credential; absent leaves it untouched
        let credential = match req.api_key.as_deref() {
            None => CredentialUpdate::Keep,
            Some("") => CredentialUpdate::Clear,
            Some(key) => CredentialUpdate::Set(self.seal(key)?),
        };

        let input = UpdateLlmProviderRow {
            display_name: req.display_name.filter(|d| !d.trim().is_empty()),
            kind: req.kind.map(|k| k.to_string()),
            base_url: req
                .base_url
                .map(|url| (!url.trim().is_empty()).then_some(url)),
            credential,
            enabled: req.enabled,
        };

        let row = self
            .db
            .update_llm_provider(id, input)
            .await?
            .ok_or_else(|| ParleyError::provider_not_found(id))?;
        tracing::info!(provider_id = %row.id, provider = %row.name, "Updated LLM provider");
        Ok(Self::row_to_provider(&row))
    }

    /// Delete a provider and, by cascade, its models
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.db.delete_llm_provider(id).await? {
            return Err(ParleyError::provider_not_found(id));
        }
        tracing::info!(provider_id = %id, "Deleted LLM provider");
        Ok(())
    }

    /// Re-derive a provider's catalog from its model source
    ///
    /// A credential that fails to decrypt, or a provider no client can be
    /// built for, aborts before anything is fetched, leaving the current
    /// catalog in place.
    pub async fn refresh_models(&self, id: Uuid) -> Result<usize> {
        let provider = self.load(id).await?;

        let api_key = match provider.credential() {
            Some(secret) => Some(self.vault.decrypt(&secret).map_err(|e| {
                tracing::error!(
                    provider_id = %provider.id,
                    provider = %provider.name,
                    error = %e,
                    "Failed to decrypt provider credentials"
                );
                ParleyError::credential("Failed to decrypt provider credentials")
            })?),
            None => None,
        };
        self.ensure_servable(&provider, api_key.as_deref())?;

        let descriptors = self
            .sources
            .get_models_for_provider(&provider, api_key.as_deref())
            .await?;
        self.models
            .replace_models_for_provider(provider.id, descriptors)
            .await
    }

    /// `ProviderUnconfigured`/`ProviderMisconfigured` when the registry cannot
    /// build a client for the provider as stored
    fn ensure_servable(&self, provider: &LlmProviderRow, api_key: Option<&str>) -> Result<()> {
        let kind = parse_kind(&provider.name, &provider.kind)?;

        let mut options = ClientOptions::new().with_ambient(self.ambient.clone());
        if let Some(key) = api_key {
            options = options.with_api_key(key);
        }
        if let Some(base_url) = &provider.base_url {
            options = options.with_base_url(base_url.clone());
        }

        if let Err(e) = self
            .registry
            .resolve_for_kind(kind, &provider.name, &options)
        {
            tracing::warn!(
                provider_id = %provider.id,
                provider = %provider.name,
                reason = %e,
                "Provider cannot be served"
            );
            return Err(e);
        }
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<LlmProviderRow> {
        self.db
            .get_llm_provider(id)
            .await?
            .ok_or_else(|| ParleyError::provider_not_found(id))
    }

    fn seal(&self, api_key: &str) -> Result<StoredCredential> {
        let secret = self
            .vault
            .encrypt(api_key)
            .map_err(|e| ParleyError::Internal(anyhow::Error::new(e)))?;
        Ok(StoredCredential {
            secret,
            hint: mask(api_key),
        })
    }

    fn row_to_provider(row: &LlmProviderRow) -> LlmProvider {
        LlmProvider {
            id: row.id,
            name: row.name.clone(),
            display_name: row.display_name.clone(),
            kind: row.kind(),
            base_url: row.base_url.clone(),
            api_key_set: row.api_key_set(),
            api_key_hint: row.api_key_hint.clone(),
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Unique constraint violations from either backend
fn is_unique_violation(err: &anyhow::Error) -> bool {
    if let Some(sqlx::Error::Database(db_err)) = err.downcast_ref::<sqlx::Error>() {
        return db_err.is_unique_violation();
    }
    err.to_string().contains("violates unique constraint")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model_sources::{
        ModelDatabaseSource, ModelsDevCache, ModelsDevDatabase,
    };
    use async_trait::async_trait;
    use parley_core::{LlmProviderKind, ModelDescriptor};
    use std::time::Duration;

    struct StaticSource;

    #[async_trait]
    impl ModelDatabaseSource for StaticSource {
        async fn fetch(&self) -> Result<ModelsDevDatabase> {
            Ok(serde_json::from_str(
                r#"{"openai":{"models":{
                    "gpt-4.1":{"name":"GPT-4.1","limit":{"context":1047576,"output":32768}},
                    "gpt-4.1-mini":{"name":"GPT-4.1 mini"}
                }}}"#,
            )
            .unwrap())
        }
    }

    fn service_with_vault(db: Arc<StorageBackend>, vault: CredentialVault) -> LlmProviderService {
        let models = Arc::new(LlmModelService::new(db.clone()));
        let cache = Arc::new(ModelsDevCache::new(
            Arc::new(StaticSource),
            Duration::from_secs(3600),
        ));
        let registry = Arc::new(crate::default_registry());
        let sources = Arc::new(ModelSources::new(cache, registry.clone()));
        LlmProviderService::new(db, Arc::new(vault), models, sources, registry)
    }

    fn service() -> (LlmProviderService, Arc<StorageBackend>) {
        let db = Arc::new(StorageBackend::in_memory());
        (service_with_vault(db.clone(), CredentialVault::ephemeral()), db)
    }

    fn create_request(name: &str, api_key: Option<&str>) -> CreateLlmProviderRequest {
        CreateLlmProviderRequest {
            name: name.to_string(),
            display_name: None,
            kind: LlmProviderKind::Official,
            base_url: None,
            api_key: api_key.map(str::to_string),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_create_encrypts_and_masks() {
        let (service, db) = service();
        let provider = service
            .create(create_request("openai", Some("sk-proj-abcdefghijklmnop")))
            .await
            .unwrap();

        assert!(provider.api_key_set);
        assert_eq!(provider.api_key_hint.as_deref(), Some("sk-p...mnop"));
        assert_eq!(provider.display_name, "openai");

        let row = db.get_llm_provider(provider.id).await.unwrap().unwrap();
        let secret = row.credential().unwrap();
        assert!(!secret.ciphertext.contains("abcdefghijklmnop"));
        assert!(!format!("{:?}", provider).contains("abcdefghijklmnop"));
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (service, _) = service();
        service.create(create_request("openai", None)).await.unwrap();
        let result = service.create(create_request("openai", None)).await;
        assert!(matches!(result, Err(ParleyError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let (service, _) = service();
        let result = service.create(create_request("  ", None)).await;
        assert!(matches!(result, Err(ParleyError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_rotates_and_clears_key() {
        let (service, db) = service();
        let provider = service
            .create(create_request("anthropic", Some("sk-ant-first-key-0001")))
            .await
            .unwrap();
        let before = db.get_llm_provider(provider.id).await.unwrap().unwrap();

        let rotated = service
            .update(
                provider.id,
                UpdateLlmProviderRequest {
                    api_key: Some("sk-ant-second-key-0002".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rotated.api_key_hint.as_deref(), Some("sk-a...0002"));
        let after = db.get_llm_provider(provider.id).await.unwrap().unwrap();
        assert_ne!(before.api_key_iv, after.api_key_iv);
        assert_ne!(before.api_key_ciphertext, after.api_key_ciphertext);

        let untouched = service
            .update(
                provider.id,
                UpdateLlmProviderRequest {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(untouched.api_key_set);
        assert!(!untouched.enabled);

        let cleared = service
            .update(
                provider.id,
                UpdateLlmProviderRequest {
                    api_key: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!cleared.api_key_set);
        assert!(cleared.api_key_hint.is_none());
    }

    #[tokio::test]
    async fn test_refresh_models_from_database() {
        let (service, db) = service();
        let provider = service
            .create(create_request("openai", Some("sk-proj-abcdefghijklmnop")))
            .await
            .unwrap();

        assert_eq!(service.refresh_models(provider.id).await.unwrap(), 2);
        let models = db.list_llm_models_for_provider(provider.id).await.unwrap();
        assert_eq!(models.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_without_key_is_unconfigured() {
        let (service, db) = service();
        let provider = service.create(create_request("openai", None)).await.unwrap();

        assert!(matches!(
            service.refresh_models(provider.id).await,
            Err(ParleyError::ProviderUnconfigured(_))
        ));
        assert!(db
            .list_llm_models_for_provider(provider.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_refresh_vertex_depends_on_ambient_config() {
        let (service, _) = service();
        let provider = service
            .create(create_request("vertex", Some("ya29.access-token-value")))
            .await
            .unwrap();
        assert!(matches!(
            service.refresh_models(provider.id).await,
            Err(ParleyError::ProviderMisconfigured(_))
        ));

        // Project and location present: the check passes and the (empty)
        // database entry is used
        let db = Arc::new(StorageBackend::in_memory());
        let configured = service_with_vault(db, CredentialVault::ephemeral()).with_ambient(
            AmbientConfig {
                vertex_project: Some("acme".to_string()),
                vertex_location: Some("us-central1".to_string()),
                vertex_access_token: None,
            },
        );
        let provider = configured
            .create(create_request("vertex", Some("ya29.access-token-value")))
            .await
            .unwrap();
        assert_eq!(configured.refresh_models(provider.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_unknown_provider() {
        let (service, _) = service();
        assert!(matches!(
            service.refresh_models(Uuid::now_v7()).await,
            Err(ParleyError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_with_undecryptable_key_keeps_catalog() {
        let db = Arc::new(StorageBackend::in_memory());
        let first = service_with_vault(db.clone(), CredentialVault::ephemeral());
        let provider = first
            .create(create_request("openai", Some("sk-proj-abcdefghijklmnop")))
            .await
            .unwrap();
        first.refresh_models(provider.id).await.unwrap();
        let models = LlmModelService::new(db.clone());
        models
            .replace_models_for_provider(provider.id, vec![ModelDescriptor::bare("kept")])
            .await
            .unwrap();

        // A restarted server with a different ephemeral key cannot read the bundle
        let second = service_with_vault(db.clone(), CredentialVault::ephemeral());
        let result = second.refresh_models(provider.id).await;
        match result {
            Err(ParleyError::Credential(msg)) => {
                assert_eq!(msg, "Failed to decrypt provider credentials")
            }
            other => panic!("Expected Credential error, got {:?}", other),
        }

        let remaining = db.list_llm_models_for_provider(provider.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].model_id, "kept");
    }

    #[tokio::test]
    async fn test_delete_cascades_to_models() {
        let (service, db) = service();
        let provider = service
            .create(create_request("openai", Some("sk-proj-abcdefghijklmnop")))
            .await
            .unwrap();
        service.refresh_models(provider.id).await.unwrap();

        service.delete(provider.id).await.unwrap();
        assert!(db
            .list_llm_models_for_provider(provider.id)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            service.get(provider.id).await,
            Err(ParleyError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn test_unique_violation_detection() {
        let err =
            anyhow::anyhow!("duplicate key value violates unique constraint: llm_providers.name");
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&anyhow::anyhow!("connection reset")));
    }
}
