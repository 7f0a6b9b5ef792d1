// LLM Provider and Model entity types
//
// These types represent the catalog entities exposed by the API. Credential
// material is never part of them; providers only expose a masked hint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// How a provider row is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    /// Native vendor protocol, resolved through the registered variant
    Official,
    /// Generic chat-completions endpoint
    OpenaiCompatible,
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderKind::Official => write!(f, "official"),
            LlmProviderKind::OpenaiCompatible => write!(f, "openai_compatible"),
        }
    }
}

impl std::str::FromStr for LlmProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official" => Ok(LlmProviderKind::Official),
            "openai_compatible" | "openai-compatible" => Ok(LlmProviderKind::OpenaiCompatible),
            _ => Err(format!("Unknown provider kind: {}", s)),
        }
    }
}

/// LLM Provider entity (API keys never exposed)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LlmProvider {
    pub id: Uuid,
    /// Stable unique key, e.g. "openai"
    pub name: String,
    pub display_name: String,
    pub kind: LlmProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Whether an API key is configured (key is never returned)
    pub api_key_set: bool,
    /// Masked key for operator recognition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_hint: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// LLM Model entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LlmModel {
    pub id: Uuid,
    pub provider_id: Uuid,
    /// Provider-native model identifier
    pub model_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub is_default: bool,
    pub metadata: ModelMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// LLM Model with provider info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LlmModelWithProvider {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub model_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub is_default: bool,
    pub metadata: ModelMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider_name: String,
    pub provider_display_name: String,
    pub provider_kind: LlmProviderKind,
    pub provider_enabled: bool,
}

// ============================================
// Model metadata
// ============================================

/// Lifecycle status reported by the model database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ModelLifecycle {
    #[default]
    Stable,
    Alpha,
    Beta,
    Deprecated,
}

/// Cost information for the model (USD per million tokens)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ModelCost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<f64>,
}

/// Capability flags of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub vision: bool,
    pub tools: bool,
    pub reasoning: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            vision: false,
            tools: false,
            reasoning: false,
        }
    }
}

/// Metadata record stored with every model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(default)]
pub struct ModelMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    pub cost: ModelCost,
    pub capabilities: ModelCapabilities,
    pub experimental: bool,
    pub status: ModelLifecycle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

/// A model as reported by a source, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ModelDescriptor {
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

impl ModelDescriptor {
    /// Descriptor with default metadata and the native id as display name
    pub fn bare(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            display_name: model_id.clone(),
            model_id,
            metadata: ModelMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [LlmProviderKind::Official, LlmProviderKind::OpenaiCompatible] {
            assert_eq!(kind.to_string().parse::<LlmProviderKind>().unwrap(), kind);
        }
        assert_eq!(
            "openai-compatible".parse::<LlmProviderKind>().unwrap(),
            LlmProviderKind::OpenaiCompatible
        );
        assert!("custom".parse::<LlmProviderKind>().is_err());
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let metadata: ModelMetadata = serde_json::from_str(r#"{"context_window":128000}"#).unwrap();
        assert_eq!(metadata.context_window, Some(128000));
        assert!(metadata.capabilities.streaming);
        assert_eq!(metadata.status, ModelLifecycle::Stable);
    }

    #[test]
    fn test_bare_descriptor() {
        let d = ModelDescriptor::bare("llama3.2:latest");
        assert_eq!(d.display_name, "llama3.2:latest");
        assert_eq!(d.metadata, ModelMetadata::default());
    }
}
