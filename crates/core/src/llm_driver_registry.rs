// LLM Driver Abstractions
//
// This module encapsulates all abstractions needed to interact with LLM Providers:
// - LlmDriver trait and types for provider-agnostic streaming completions
// - DriverRegistry mapping provider names to client factories and capability flags
// - Message types for LLM calls
//
// IMPORTANT: API keys come from the credential vault. The registry does NOT read
// keys from environment variables. Only ambient cloud settings (project, region)
// are sourced from process configuration, via AmbientConfig.
//
// Design: Dependency inversion - provider crates (parley-openai, parley-anthropic,
// parley-google) depend on core and register their variants at startup. Core only
// knows the generic OpenAI-compatible fallback.

use crate::error::{ParleyError, Result};
use crate::llm_models::LlmProviderKind;
use crate::openai_protocol::OpenAIProtocolLlmDriver;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

// ============================================================================
// LlmDriver Trait
// ============================================================================

/// Type alias for the LLM response stream
pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent>> + Send>>;

/// Events emitted during LLM streaming
#[derive(Debug, Clone, PartialEq)]
pub enum LlmStreamEvent {
    /// Text delta (incremental content)
    TextDelta(String),
    /// Streaming completed
    Done(LlmCompletionMetadata),
    /// Error during streaming, terminal
    Error(String),
}

/// Metadata about LLM completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmCompletionMetadata {
    /// Total tokens used
    pub total_tokens: Option<u32>,
    /// Prompt tokens
    pub prompt_tokens: Option<u32>,
    /// Completion tokens
    pub completion_tokens: Option<u32>,
    /// Model used
    pub model: Option<String>,
    /// Finish reason
    pub finish_reason: Option<String>,
}

/// Trait for LLM drivers
///
/// Implementations handle provider-specific API calls and response parsing.
/// `chat_completion_stream` returns once response headers arrive; a non-success
/// status is reported as `ParleyError::Upstream` before any event is produced.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Call the LLM with streaming response
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream>;

    /// Call the LLM and collect the full text (convenience method)
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        use futures::StreamExt;

        let mut stream = self.chat_completion_stream(messages, config).await?;
        let mut text = String::new();
        let mut metadata = None;

        while let Some(event) = stream.next().await {
            match event? {
                LlmStreamEvent::TextDelta(delta) => text.push_str(&delta),
                LlmStreamEvent::Done(meta) => {
                    metadata = Some(meta);
                    break;
                }
                LlmStreamEvent::Error(err) => {
                    return Err(ParleyError::upstream(config.model.clone(), err))
                }
            }
        }

        let metadata = metadata.ok_or(ParleyError::StreamInterrupted)?;
        Ok(LlmResponse { text, metadata })
    }
}

/// Implement LlmDriver for Box<dyn LlmDriver> to allow dynamic dispatch
#[async_trait]
impl LlmDriver for Box<dyn LlmDriver> {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        (**self).chat_completion_stream(messages, config).await
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Message format for LLM calls (provider-agnostic)
#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
}

impl LlmMessage {
    /// Create a message with text content
    pub fn text(role: LlmMessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(LlmMessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(LlmMessageRole::Assistant, content)
    }
}

/// Message role for LLM calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
}

// ============================================================================
// Configuration and Response Types
// ============================================================================

/// Configuration for an LLM call
#[derive(Debug, Clone, Default)]
pub struct LlmCallConfig {
    /// Provider-native model identifier
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// System instruction, placed by each driver the way its vendor expects
    pub system: Option<String>,
}

impl LlmCallConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Response from an LLM call (non-streaming)
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub metadata: LlmCompletionMetadata,
}

// ============================================================================
// Provider Variants
// ============================================================================

/// How the dispatcher invokes a provider's models.
///
/// `Direct` vendors expose each model as a callable unit over a bespoke native
/// protocol. `ChatMethod` vendors expose every model through one generic
/// chat-completions endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum InvocationStyle {
    Direct,
    ChatMethod,
}

impl std::fmt::Display for InvocationStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationStyle::Direct => write!(f, "direct"),
            InvocationStyle::ChatMethod => write!(f, "chat-method"),
        }
    }
}

/// Capability flags of a provider variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub vision: bool,
    pub tools: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            vision: false,
            tools: false,
        }
    }
}

/// Process-wide settings some variants read instead of database fields
#[derive(Debug, Clone, Default)]
pub struct AmbientConfig {
    pub vertex_project: Option<String>,
    pub vertex_location: Option<String>,
    pub vertex_access_token: Option<String>,
}

impl AmbientConfig {
    /// Read GOOGLE_VERTEX_PROJECT, GOOGLE_VERTEX_LOCATION and GOOGLE_VERTEX_ACCESS_TOKEN
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            vertex_project: read("GOOGLE_VERTEX_PROJECT"),
            vertex_location: read("GOOGLE_VERTEX_LOCATION"),
            vertex_access_token: read("GOOGLE_VERTEX_ACCESS_TOKEN"),
        }
    }
}

/// Options passed to a variant factory: decrypted credentials and overrides
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub ambient: AmbientConfig,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key; empty strings are treated as absent
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    /// Set the base URL; empty strings are treated as absent
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    pub fn with_ambient(mut self, ambient: AmbientConfig) -> Self {
        self.ambient = ambient;
        self
    }

    /// API key or `ProviderUnconfigured`
    pub fn require_api_key(&self, provider: &str) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ParleyError::unconfigured(format!(
                "Provider '{}' has no API key. Configure the API key in provider settings.",
                provider
            ))
        })
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("ambient", &self.ambient)
            .finish()
    }
}

/// Boxed LLM driver for dynamic dispatch
pub type BoxedLlmDriver = Box<dyn LlmDriver>;

/// Factory function type for creating LLM drivers
///
/// Pure: builds a client handle bound to one vendor wire protocol.
pub type DriverFactory = Arc<dyn Fn(&ClientOptions) -> Result<BoxedLlmDriver> + Send + Sync>;

/// A registered provider variant
#[derive(Clone)]
pub struct ProviderVariant {
    pub style: InvocationStyle,
    pub capabilities: ProviderCapabilities,
    /// Base URL used when the provider row carries none
    pub default_base_url: Option<String>,
    /// Operator-run instance whose catalog is listed from the instance itself
    pub local_runtime: bool,
    pub factory: DriverFactory,
}

impl ProviderVariant {
    pub fn new<F>(style: InvocationStyle, factory: F) -> Self
    where
        F: Fn(&ClientOptions) -> Result<BoxedLlmDriver> + Send + Sync + 'static,
    {
        Self {
            style,
            capabilities: ProviderCapabilities::default(),
            default_base_url: None,
            local_runtime: false,
            factory: Arc::new(factory),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_default_base_url(mut self, url: impl Into<String>) -> Self {
        self.default_base_url = Some(url.into());
        self
    }

    pub fn as_local_runtime(mut self) -> Self {
        self.local_runtime = true;
        self
    }
}

impl std::fmt::Debug for ProviderVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderVariant")
            .field("style", &self.style)
            .field("capabilities", &self.capabilities)
            .field("default_base_url", &self.default_base_url)
            .field("local_runtime", &self.local_runtime)
            .finish()
    }
}

// ============================================================================
// Driver Registry
// ============================================================================

/// Registry of provider variants keyed by provider name
///
/// Provider crates register their variants at startup:
///
/// ```ignore
/// let mut registry = DriverRegistry::new();
/// parley_openai::register_drivers(&mut registry);
/// parley_anthropic::register_driver(&mut registry);
/// parley_google::register_drivers(&mut registry);
///
/// let driver = registry.resolve_client("anthropic", &options)?;
/// ```
///
/// Any name without a registered variant resolves to the fallback factory,
/// by default the generic OpenAI-compatible driver, which requires a base URL.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    variants: HashMap<String, ProviderVariant>,
    fallback: Option<DriverFactory>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            variants: HashMap::new(),
            fallback: None,
        }
    }

    /// Replace the factory used for provider names without a variant
    pub fn set_fallback<F>(&mut self, factory: F)
    where
        F: Fn(&ClientOptions) -> Result<BoxedLlmDriver> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(factory));
    }

    /// Register a variant under a provider name (case-insensitive)
    pub fn register(&mut self, name: impl AsRef<str>, variant: ProviderVariant) {
        self.variants
            .insert(name.as_ref().to_lowercase(), variant);
    }

    fn variant(&self, name: &str) -> Option<&ProviderVariant> {
        self.variants.get(&name.to_lowercase())
    }

    /// Build a client for the named provider
    ///
    /// Unknown names are treated as OpenAI-compatible endpoints. With neither
    /// credentials nor a base URL they fail with `ProviderUnconfigured`.
    pub fn resolve_client(
        &self,
        provider_name: &str,
        options: &ClientOptions,
    ) -> Result<BoxedLlmDriver> {
        match self.variant(provider_name) {
            Some(variant) => {
                let mut options = options.clone();
                if options.base_url.is_none() {
                    options.base_url = variant.default_base_url.clone();
                }
                (variant.factory)(&options)
            }
            None => match &self.fallback {
                Some(factory) => factory(options),
                None => Self::generic_compatible(provider_name, options),
            },
        }
    }

    /// Build the generic chat-completions client for a provider stored as
    /// OpenAI-compatible, regardless of its registered variant
    pub fn resolve_compatible(
        &self,
        provider_name: &str,
        options: &ClientOptions,
    ) -> Result<BoxedLlmDriver> {
        let mut options = options.clone();
        if options.base_url.is_none() {
            options.base_url = self
                .variant(provider_name)
                .and_then(|v| v.default_base_url.clone());
        }
        Self::generic_compatible(provider_name, &options)
    }

    /// Build the client a stored provider is served with
    ///
    /// `Official` rows go through their registered variant; `OpenaiCompatible`
    /// rows always get the generic chat-completions client.
    pub fn resolve_for_kind(
        &self,
        kind: LlmProviderKind,
        provider_name: &str,
        options: &ClientOptions,
    ) -> Result<(BoxedLlmDriver, InvocationStyle)> {
        match kind {
            LlmProviderKind::Official => Ok((
                self.resolve_client(provider_name, options)?,
                self.invocation_style(provider_name),
            )),
            LlmProviderKind::OpenaiCompatible => Ok((
                self.resolve_compatible(provider_name, options)?,
                InvocationStyle::ChatMethod,
            )),
        }
    }

    fn generic_compatible(provider_name: &str, options: &ClientOptions) -> Result<BoxedLlmDriver> {
        let base_url = options.base_url.as_deref().ok_or_else(|| {
            if options.api_key.is_none() {
                ParleyError::unconfigured(format!(
                    "Unknown provider '{}' has no credentials and no base URL",
                    provider_name
                ))
            } else {
                ParleyError::unconfigured(format!(
                    "OpenAI-compatible provider '{}' requires a base URL",
                    provider_name
                ))
            }
        })?;

        Ok(Box::new(OpenAIProtocolLlmDriver::compatible(
            provider_name,
            options.api_key.clone(),
            base_url,
        )))
    }

    /// Invocation style of the named provider; unknown names use `ChatMethod`
    pub fn invocation_style(&self, provider_name: &str) -> InvocationStyle {
        self.variant(provider_name)
            .map(|v| v.style)
            .unwrap_or(InvocationStyle::ChatMethod)
    }

    /// Capability flags of the named provider
    pub fn capabilities(&self, provider_name: &str) -> ProviderCapabilities {
        self.variant(provider_name)
            .map(|v| v.capabilities)
            .unwrap_or_default()
    }

    /// Default base URL of the named provider, if it has one
    pub fn default_base_url(&self, provider_name: &str) -> Option<String> {
        self.variant(provider_name)
            .and_then(|v| v.default_base_url.clone())
    }

    /// Whether the named provider is a local runtime (ollama, lmstudio)
    pub fn is_local_runtime(&self, provider_name: &str) -> bool {
        self.variant(provider_name)
            .map(|v| v.local_runtime)
            .unwrap_or(false)
    }

    /// Check if a variant is registered for a provider name
    pub fn has_provider(&self, provider_name: &str) -> bool {
        self.variant(provider_name).is_some()
    }

    /// Registered provider names, sorted
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variants.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDriver;

    #[async_trait]
    impl LlmDriver for MockDriver {
        async fn chat_completion_stream(
            &self,
            _messages: Vec<LlmMessage>,
            _config: &LlmCallConfig,
        ) -> Result<LlmResponseStream> {
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(LlmStreamEvent::TextDelta("Hel".to_string())),
                Ok(LlmStreamEvent::TextDelta("lo".to_string())),
                Ok(LlmStreamEvent::Done(LlmCompletionMetadata::default())),
            ])))
        }
    }

    fn keyed_variant(style: InvocationStyle) -> ProviderVariant {
        ProviderVariant::new(style, |options| {
            options.require_api_key("mock")?;
            Ok(Box::new(MockDriver) as BoxedLlmDriver)
        })
    }

    #[test]
    fn test_registry_registration() {
        let mut registry = DriverRegistry::new();
        assert!(!registry.has_provider("anthropic"));

        registry.register("Anthropic", keyed_variant(InvocationStyle::Direct));

        assert!(registry.has_provider("anthropic"));
        assert!(registry.has_provider("ANTHROPIC"));
        assert_eq!(registry.provider_names(), vec!["anthropic".to_string()]);
    }

    #[test]
    fn test_registered_variant_requires_api_key() {
        let mut registry = DriverRegistry::new();
        registry.register("openai", keyed_variant(InvocationStyle::Direct));

        let result = registry.resolve_client("openai", &ClientOptions::new());
        assert!(matches!(result, Err(ParleyError::ProviderUnconfigured(_))));

        let options = ClientOptions::new().with_api_key("sk-test");
        assert!(registry.resolve_client("openai", &options).is_ok());
    }

    #[test]
    fn test_empty_api_key_is_absent() {
        let options = ClientOptions::new().with_api_key("   ");
        assert!(options.api_key.is_none());
        assert!(options.require_api_key("x").is_err());
    }

    #[test]
    fn test_unknown_provider_without_anything_is_unconfigured() {
        let registry = DriverRegistry::new();
        let result = registry.resolve_client("my-vllm", &ClientOptions::new());
        assert!(matches!(result, Err(ParleyError::ProviderUnconfigured(_))));
    }

    #[test]
    fn test_unknown_provider_with_key_but_no_base_url_is_unconfigured() {
        let registry = DriverRegistry::new();
        let options = ClientOptions::new().with_api_key("key");
        let result = registry.resolve_client("my-vllm", &options);
        match result {
            Err(ParleyError::ProviderUnconfigured(msg)) => assert!(msg.contains("base URL")),
            _ => panic!("Expected ProviderUnconfigured"),
        }
    }

    #[test]
    fn test_unknown_provider_falls_back_to_compatible() {
        let registry = DriverRegistry::new();
        let options = ClientOptions::new().with_base_url("http://localhost:8000/v1");
        let driver = registry.resolve_client("my-vllm", &options);
        assert!(driver.is_ok());
        assert_eq!(
            registry.invocation_style("my-vllm"),
            InvocationStyle::ChatMethod
        );
    }

    #[test]
    fn test_resolve_compatible_uses_variant_default_base_url() {
        let mut registry = DriverRegistry::new();
        registry.register(
            "ollama",
            keyed_variant(InvocationStyle::ChatMethod)
                .with_default_base_url("http://localhost:11434/v1"),
        );

        assert!(registry
            .resolve_compatible("ollama", &ClientOptions::new())
            .is_ok());
        assert!(registry
            .resolve_compatible("unknown", &ClientOptions::new())
            .is_err());
    }

    #[test]
    fn test_invocation_style_and_capabilities() {
        let mut registry = DriverRegistry::new();
        let caps = ProviderCapabilities {
            streaming: true,
            vision: true,
            tools: true,
        };
        registry.register(
            "anthropic",
            keyed_variant(InvocationStyle::Direct).with_capabilities(caps),
        );

        assert_eq!(
            registry.invocation_style("anthropic"),
            InvocationStyle::Direct
        );
        assert_eq!(registry.capabilities("anthropic"), caps);
        assert_eq!(
            registry.capabilities("nobody"),
            ProviderCapabilities::default()
        );
        assert_eq!(InvocationStyle::ChatMethod.to_string(), "chat-method");
    }

    #[test]
    fn test_resolve_for_kind() {
        let mut registry = DriverRegistry::new();
        registry.register("anthropic", keyed_variant(InvocationStyle::Direct));
        let options = ClientOptions::new().with_api_key("sk-test");

        let (_, style) = registry
            .resolve_for_kind(LlmProviderKind::Official, "anthropic", &options)
            .unwrap();
        assert_eq!(style, InvocationStyle::Direct);

        // Compatible rows ignore the variant and need a base URL
        let result =
            registry.resolve_for_kind(LlmProviderKind::OpenaiCompatible, "anthropic", &options);
        assert!(matches!(result, Err(ParleyError::ProviderUnconfigured(_))));

        let options = options.with_base_url("http://localhost:8000/v1");
        let (_, style) = registry
            .resolve_for_kind(LlmProviderKind::OpenaiCompatible, "anthropic", &options)
            .unwrap();
        assert_eq!(style, InvocationStyle::ChatMethod);

        assert!(matches!(
            registry.resolve_for_kind(LlmProviderKind::Official, "anthropic", &ClientOptions::new()),
            Err(ParleyError::ProviderUnconfigured(_))
        ));
    }

    #[test]
    fn test_local_runtime_flag() {
        let mut registry = DriverRegistry::new();
        registry.register(
            "lmstudio",
            keyed_variant(InvocationStyle::ChatMethod).as_local_runtime(),
        );
        registry.register("groq", keyed_variant(InvocationStyle::ChatMethod));

        assert!(registry.is_local_runtime("LMStudio"));
        assert!(!registry.is_local_runtime("groq"));
        assert!(!registry.is_local_runtime("my-vllm"));
    }

    #[test]
    fn test_client_options_debug_redacts_key() {
        let options = ClientOptions::new().with_api_key("sk-very-secret");
        let debug = format!("{:?}", options);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_chat_completion_collects_text() {
        let driver = MockDriver;
        let response = driver
            .chat_completion(vec![LlmMessage::user("hi")], &LlmCallConfig::new("m"))
            .await
            .unwrap();
        assert_eq!(response.text, "Hello");
    }

    #[test]
    fn test_custom_fallback() {
        let mut registry = DriverRegistry::new();
        assert!(registry
            .resolve_client("my-vllm", &ClientOptions::new())
            .is_err());

        registry.set_fallback(|_| Ok(Box::new(MockDriver) as BoxedLlmDriver));
        assert!(registry
            .resolve_client("my-vllm", &ClientOptions::new())
            .is_ok());
        assert!(!registry.has_provider("my-vllm"));
    }
}
