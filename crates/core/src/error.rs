// Error types for provider resolution, dispatch and catalog operations

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Errors that can occur while resolving providers, dispatching completions
/// or maintaining the model catalog
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Provider lacks credentials or a base URL required by its invocation style
    #[error("Provider unconfigured: {0}")]
    ProviderUnconfigured(String),

    /// Provider requires ambient process configuration that is absent
    #[error("Provider misconfigured: {0}")]
    ProviderMisconfigured(String),

    /// Credential bundle failed to decrypt or authenticate
    #[error("Credential error: {0}")]
    Credential(String),

    /// Unknown, disabled or provider-disabled model
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Unknown provider id
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Failure reported by the upstream vendor
    #[error("Upstream error from {provider}: {message}")]
    Upstream { provider: String, message: String },

    /// Upstream closed the stream without a completion marker
    #[error("Stream interrupted before completion")]
    StreamInterrupted,

    /// Remote model database or local instance listing failed
    #[error("Model catalog fetch failed: {0}")]
    ModelCatalogFetch(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ParleyError {
    /// Create a provider unconfigured error
    pub fn unconfigured(msg: impl Into<String>) -> Self {
        ParleyError::ProviderUnconfigured(msg.into())
    }

    /// Create a provider misconfigured error
    pub fn misconfigured(msg: impl Into<String>) -> Self {
        ParleyError::ProviderMisconfigured(msg.into())
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        ParleyError::Credential(msg.into())
    }

    /// Create a model not found error
    pub fn model_not_found(model: impl Into<String>) -> Self {
        ParleyError::ModelNotFound(model.into())
    }

    /// Create a provider not found error
    pub fn provider_not_found(provider: impl ToString) -> Self {
        ParleyError::ProviderNotFound(provider.to_string())
    }

    /// Create an upstream error
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ParleyError::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a catalog fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        ParleyError::ModelCatalogFetch(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        ParleyError::Validation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        ParleyError::Conflict(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ParleyError::Configuration(msg.into())
    }

    /// True for the two "provider cannot serve" variants
    pub fn is_provider_setup(&self) -> bool {
        matches!(
            self,
            ParleyError::ProviderUnconfigured(_) | ParleyError::ProviderMisconfigured(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display_includes_provider() {
        let err = ParleyError::upstream("anthropic", "rate limited");
        assert_eq!(err.to_string(), "Upstream error from anthropic: rate limited");
    }

    #[test]
    fn test_provider_setup_classification() {
        assert!(ParleyError::unconfigured("no key").is_provider_setup());
        assert!(ParleyError::misconfigured("no project").is_provider_setup());
        assert!(!ParleyError::model_not_found("x").is_provider_setup());
    }

    #[test]
    fn test_internal_from_anyhow() {
        let err: ParleyError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, ParleyError::Internal(_)));
    }
}
