// Completion dispatcher
//
// Resolves a public model identifier to a ready-to-call driver and opens the
// upstream stream. Every failure that can be known before the first byte is
// reported here, so the chat endpoint can still answer with a JSON error.

use futures::StreamExt;
use parley_core::{
    AmbientConfig, BoxedLlmDriver, ClientOptions, DriverRegistry, InvocationStyle, LlmCallConfig,
    LlmMessage, LlmProviderKind, LlmResponseStream, LlmStreamEvent, ParleyError, Result,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_OUTPUT_TOKENS;
use crate::storage::{parse_metadata, CredentialVault, StorageBackend};

/// A model bound to a client for its provider
pub struct InvocableModel {
    pub id: Uuid,
    /// Provider-native model identifier
    pub model_id: String,
    pub provider_name: String,
    pub style: InvocationStyle,
    pub max_output_tokens: Option<u32>,
    pub driver: BoxedLlmDriver,
}

impl std::fmt::Debug for InvocableModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocableModel")
            .field("id", &self.id)
            .field("model_id", &self.model_id)
            .field("provider_name", &self.provider_name)
            .field("style", &self.style)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

pub struct CompletionDispatcher {
    db: Arc<StorageBackend>,
    vault: Arc<CredentialVault>,
    registry: Arc<DriverRegistry>,
    ambient: AmbientConfig,
    default_max_output_tokens: u32,
}

impl CompletionDispatcher {
    pub fn new(
        db: Arc<StorageBackend>,
        vault: Arc<CredentialVault>,
        registry: Arc<DriverRegistry>,
        ambient: AmbientConfig,
    ) -> Self {
        Self {
            db,
            vault,
            registry,
            ambient,
            default_max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_default_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.default_max_output_tokens = max_output_tokens;
        self
    }

    /// Resolve a public model identifier
    ///
    /// Unknown, disabled and unservable models are all `ModelNotFound`; the
    /// reason a provider cannot serve is logged, not returned.
    pub async fn get_invocable_model(&self, model_identifier: &str) -> Result<InvocableModel> {
        let id = Uuid::parse_str(model_identifier.trim())
            .map_err(|_| ParleyError::model_not_found(model_identifier))?;

        let row = self
            .db
            .get_invocable_model(id)
            .await?
            .ok_or_else(|| ParleyError::model_not_found(model_identifier))?;

        if row.credential_is_partial() {
            tracing::error!(
                provider_id = %row.provider_id,
                provider = %row.provider_name,
                "Provider credential bundle is incomplete"
            );
            return Err(ParleyError::credential("Failed to decrypt provider credentials"));
        }

        let mut options = ClientOptions::new().with_ambient(self.ambient.clone());
        if let Some(secret) = row.credential() {
            let api_key = self.vault.decrypt(&secret).map_err(|e| {
                tracing::error!(
                    provider_id = %row.provider_id,
                    provider = %row.provider_name,
                    error = %e,
                    "Failed to decrypt provider credentials"
                );
                ParleyError::credential("Failed to decrypt provider credentials")
            })?;
            options = options.with_api_key(api_key);
        }
        if let Some(base_url) = &row.provider_base_url {
            options = options.with_base_url(base_url.clone());
        }

        let resolved = parse_kind(&row.provider_name, &row.provider_kind).and_then(|kind| {
            self.registry
                .resolve_for_kind(kind, &row.provider_name, &options)
        });

        let (driver, style) = match resolved {
            Ok(resolved) => resolved,
            Err(e) if e.is_provider_setup() => {
                tracing::warn!(
                    provider = %row.provider_name,
                    model_id = %row.model_id,
                    reason = %e,
                    "Provider cannot serve model"
                );
                return Err(ParleyError::model_not_found(model_identifier));
            }
            Err(e) => return Err(e),
        };

        let metadata = parse_metadata(&row.metadata);
        Ok(InvocableModel {
            id: row.id,
            model_id: row.model_id,
            provider_name: row.provider_name,
            style,
            max_output_tokens: metadata.max_output_tokens,
            driver,
        })
    }

    /// Open the upstream stream for one turn
    ///
    /// The returned stream ends after its first `Done` or `Error` event. If
    /// upstream closes without either, it yields `StreamInterrupted` last.
    pub async fn stream_completion(
        &self,
        model: &InvocableModel,
        messages: Vec<LlmMessage>,
        system_prompt: Option<&str>,
        max_output_tokens: Option<u32>,
    ) -> Result<LlmResponseStream> {
        let max_tokens = self.effective_max_tokens(model, max_output_tokens);
        let mut config = LlmCallConfig::new(model.model_id.clone()).with_max_tokens(max_tokens);
        if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
            config = config.with_system(system);
        }

        tracing::debug!(
            provider = %model.provider_name,
            model_id = %model.model_id,
            style = %model.style,
            max_tokens,
            messages = messages.len(),
            "Opening completion stream"
        );

        let stream = model.driver.chat_completion_stream(messages, &config).await?;
        Ok(ensure_terminal(stream))
    }

    fn effective_max_tokens(&self, model: &InvocableModel, requested: Option<u32>) -> u32 {
        let requested = requested
            .filter(|t| *t > 0)
            .unwrap_or(self.default_max_output_tokens);
        match model.max_output_tokens {
            Some(limit) => requested.min(limit),
            None => requested,
        }
    }
}

/// Strict parse of a stored provider kind; unknown values are a setup error
pub(crate) fn parse_kind(provider_name: &str, raw: &str) -> Result<LlmProviderKind> {
    raw.parse().map_err(|_| {
        tracing::error!(
            provider = %provider_name,
            kind = %raw,
            "Stored provider kind is not recognised"
        );
        ParleyError::misconfigured(format!(
            "Provider '{}' has unknown kind '{}'",
            provider_name, raw
        ))
    })
}

/// Cut the stream after its terminal event and mark a silent close
fn ensure_terminal(stream: LlmResponseStream) -> LlmResponseStream {
    Box::pin(futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.next().await {
            Some(Ok(event)) => {
                let terminal =
                    matches!(event, LlmStreamEvent::Done(_) | LlmStreamEvent::Error(_));
                Some((Ok(event), (!terminal).then_some(stream)))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((Err(ParleyError::StreamInterrupted), None)),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{mask, CreateLlmProviderRow, NewLlmModelRow, StoredCredential};
    use async_trait::async_trait;
    use parley_core::{LlmCompletionMetadata, LlmDriver, ModelMetadata, ProviderVariant};
    use parking_lot::Mutex;

    /// Records the call config and replays a fixed event script
    #[derive(Clone)]
    struct ScriptedDriver {
        events: Vec<LlmStreamEvent>,
        seen: Arc<Mutex<Option<LlmCallConfig>>>,
    }

    #[async_trait]
    impl LlmDriver for ScriptedDriver {
        async fn chat_completion_stream(
            &self,
            _messages: Vec<LlmMessage>,
            config: &LlmCallConfig,
        ) -> Result<LlmResponseStream> {
            *self.seen.lock() = Some(config.clone());
            let events: Vec<Result<LlmStreamEvent>> =
                self.events.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct Fixture {
        db: Arc<StorageBackend>,
        vault: Arc<CredentialVault>,
        seen: Arc<Mutex<Option<LlmCallConfig>>>,
        dispatcher: CompletionDispatcher,
    }

    fn fixture(events: Vec<LlmStreamEvent>) -> Fixture {
        let db = Arc::new(StorageBackend::in_memory());
        let vault = Arc::new(CredentialVault::ephemeral());
        let seen = Arc::new(Mutex::new(None));

        let driver = ScriptedDriver {
            events,
            seen: seen.clone(),
        };
        let mut registry = DriverRegistry::new();
        registry.register(
            "mockai",
            ProviderVariant::new(InvocationStyle::Direct, move |options| {
                options.require_api_key("mockai")?;
                Ok(Box::new(driver.clone()) as BoxedLlmDriver)
            }),
        );

        let dispatcher = CompletionDispatcher::new(
            db.clone(),
            vault.clone(),
            Arc::new(registry),
            AmbientConfig::default(),
        );
        Fixture {
            db,
            vault,
            seen,
            dispatcher,
        }
    }

    async fn add_model(
        f: &Fixture,
        name: &str,
        kind: LlmProviderKind,
        api_key: Option<&str>,
        base_url: Option<&str>,
        max_output_tokens: Option<u32>,
    ) -> Uuid {
        let credential = api_key.map(|key| StoredCredential {
            secret: f.vault.encrypt(key).unwrap(),
            hint: mask(key),
        });
        let provider = f
            .db
            .create_llm_provider(CreateLlmProviderRow {
                name: name.to_string(),
                display_name: name.to_string(),
                kind: kind.to_string(),
                base_url: base_url.map(str::to_string),
                credential,
                enabled: true,
            })
            .await
            .unwrap();
        f.db.replace_llm_models_for_provider(
            provider.id,
            vec![NewLlmModelRow {
                model_id: format!("{}-model", name),
                display_name: "Model".to_string(),
                metadata: ModelMetadata {
                    max_output_tokens,
                    ..Default::default()
                },
            }],
        )
        .await
        .unwrap();
        f.db.list_llm_models_for_provider(provider.id).await.unwrap()[0].id
    }

    fn done() -> LlmStreamEvent {
        LlmStreamEvent::Done(LlmCompletionMetadata::default())
    }

    #[tokio::test]
    async fn test_unparseable_and_unknown_identifiers() {
        let f = fixture(vec![]);
        assert!(matches!(
            f.dispatcher.get_invocable_model("not-a-uuid").await,
            Err(ParleyError::ModelNotFound(_))
        ));
        assert!(matches!(
            f.dispatcher
                .get_invocable_model(&Uuid::now_v7().to_string())
                .await,
            Err(ParleyError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolves_official_provider() {
        let f = fixture(vec![done()]);
        let id = add_model(
            &f,
            "mockai",
            LlmProviderKind::Official,
            Some("key-123"),
            None,
            None,
        )
        .await;

        let model = f
            .dispatcher
            .get_invocable_model(&id.to_string())
            .await
            .unwrap();
        assert_eq!(model.model_id, "mockai-model");
        assert_eq!(model.provider_name, "mockai");
        assert_eq!(model.style, InvocationStyle::Direct);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_model_not_found() {
        let f = fixture(vec![]);
        let id = add_model(&f, "mockai", LlmProviderKind::Official, None, None, None).await;
        assert!(matches!(
            f.dispatcher.get_invocable_model(&id.to_string()).await,
            Err(ParleyError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_model_not_found() {
        let f = fixture(vec![]);
        let id = add_model(&f, "mockai", LlmProviderKind::Official, Some("k"), None, None).await;
        let provider_id = f.db.list_all_llm_models().await.unwrap()[0].provider_id;
        f.db.update_llm_provider(
            provider_id,
            crate::storage::UpdateLlmProviderRow {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            f.dispatcher.get_invocable_model(&id.to_string()).await,
            Err(ParleyError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_undecryptable_credential() {
        let f = fixture(vec![]);
        let id = add_model(&f, "mockai", LlmProviderKind::Official, Some("k"), None, None).await;

        let other = CompletionDispatcher::new(
            f.db.clone(),
            Arc::new(CredentialVault::ephemeral()),
            Arc::new(DriverRegistry::new()),
            AmbientConfig::default(),
        );
        assert!(matches!(
            other.get_invocable_model(&id.to_string()).await,
            Err(ParleyError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_compatible_provider_uses_generic_driver() {
        let f = fixture(vec![]);
        let with_url = add_model(
            &f,
            "my-vllm",
            LlmProviderKind::OpenaiCompatible,
            None,
            Some("http://localhost:8000/v1"),
            None,
        )
        .await;
        let model = f
            .dispatcher
            .get_invocable_model(&with_url.to_string())
            .await
            .unwrap();
        assert_eq!(model.style, InvocationStyle::ChatMethod);

        let without_url = add_model(
            &f,
            "bare-compat",
            LlmProviderKind::OpenaiCompatible,
            Some("k"),
            None,
            None,
        )
        .await;
        assert!(matches!(
            f.dispatcher
                .get_invocable_model(&without_url.to_string())
                .await,
            Err(ParleyError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_stored_kind_is_model_not_found() {
        let f = fixture(vec![done()]);
        let id = add_model(
            &f,
            "my-vllm",
            LlmProviderKind::OpenaiCompatible,
            Some("k"),
            Some("http://localhost:8000/v1"),
            None,
        )
        .await;
        let provider_id = f.db.list_all_llm_models().await.unwrap()[0].provider_id;
        f.db.update_llm_provider(
            provider_id,
            crate::storage::UpdateLlmProviderRow {
                kind: Some("legacy_proxy".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            f.dispatcher.get_invocable_model(&id.to_string()).await,
            Err(ParleyError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            parse_kind("openai", "official").unwrap(),
            LlmProviderKind::Official
        );
        assert!(matches!(
            parse_kind("x", "legacy_proxy"),
            Err(ParleyError::ProviderMisconfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_max_tokens_clamped_and_system_passed() {
        let f = fixture(vec![LlmStreamEvent::TextDelta("hi".to_string()), done()]);
        let id = add_model(
            &f,
            "mockai",
            LlmProviderKind::Official,
            Some("k"),
            None,
            Some(1000),
        )
        .await;
        let model = f
            .dispatcher
            .get_invocable_model(&id.to_string())
            .await
            .unwrap();

        let stream = f
            .dispatcher
            .stream_completion(
                &model,
                vec![LlmMessage::user("hello")],
                Some("Be terse"),
                Some(5000),
            )
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);

        let config = f.seen.lock().clone().unwrap();
        assert_eq!(config.model, "mockai-model");
        assert_eq!(config.max_tokens, Some(1000));
        assert_eq!(config.system.as_deref(), Some("Be terse"));
    }

    #[tokio::test]
    async fn test_default_max_tokens_without_limit() {
        let f = fixture(vec![done()]);
        let id = add_model(&f, "mockai", LlmProviderKind::Official, Some("k"), None, None).await;
        let model = f
            .dispatcher
            .get_invocable_model(&id.to_string())
            .await
            .unwrap();

        f.dispatcher
            .stream_completion(&model, vec![LlmMessage::user("hello")], None, None)
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;
        let config = f.seen.lock().clone().unwrap();
        assert_eq!(config.max_tokens, Some(DEFAULT_MAX_OUTPUT_TOKENS));
        assert!(config.system.is_none());
    }

    #[tokio::test]
    async fn test_silent_close_becomes_interrupted() {
        let f = fixture(vec![LlmStreamEvent::TextDelta("partial".to_string())]);
        let id = add_model(&f, "mockai", LlmProviderKind::Official, Some("k"), None, None).await;
        let model = f
            .dispatcher
            .get_invocable_model(&id.to_string())
            .await
            .unwrap();

        let events: Vec<_> = f
            .dispatcher
            .stream_completion(&model, vec![LlmMessage::user("hello")], None, None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ParleyError::StreamInterrupted)));
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_dropped() {
        let f = fixture(vec![
            LlmStreamEvent::Error("overloaded".to_string()),
            LlmStreamEvent::TextDelta("late".to_string()),
        ]);
        let id = add_model(&f, "mockai", LlmProviderKind::Official, Some("k"), None, None).await;
        let model = f
            .dispatcher
            .get_invocable_model(&id.to_string())
            .await
            .unwrap();

        let events: Vec<_> = f
            .dispatcher
            .stream_completion(&model, vec![LlmMessage::user("hello")], None, None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 1);
    }
}
