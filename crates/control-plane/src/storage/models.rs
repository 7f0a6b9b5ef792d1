// Database row types for the provider catalog
//
// Rows mirror the `llm_providers` / `llm_models` tables. Conversion to the
// API entities in parley-core happens in the service layer.

use chrono::{DateTime, Utc};
use parley_core::{LlmModelWithProvider, LlmProviderKind, ModelMetadata};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::encryption::EncryptedSecret;

// ============================================
// Providers
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct LlmProviderRow {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub kind: String,
    pub base_url: Option<String>,
    pub api_key_ciphertext: Option<String>,
    pub api_key_iv: Option<String>,
    pub api_key_tag: Option<String>,
    pub api_key_hint: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LlmProviderRow {
    /// Credential bundle, present only when all three columns are set
    pub fn credential(&self) -> Option<EncryptedSecret> {
        credential_from_columns(
            self.api_key_ciphertext.as_ref(),
            self.api_key_iv.as_ref(),
            self.api_key_tag.as_ref(),
        )
    }

    pub fn api_key_set(&self) -> bool {
        self.api_key_ciphertext.is_some()
    }

    pub fn kind(&self) -> LlmProviderKind {
        self.kind.parse().unwrap_or(LlmProviderKind::OpenaiCompatible)
    }
}

/// Encrypted key plus its display hint
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub secret: EncryptedSecret,
    pub hint: String,
}

/// What an update does to the credential bundle
#[derive(Debug, Clone, Default)]
pub enum CredentialUpdate {
    #[default]
    Keep,
    Set(StoredCredential),
    Clear,
}

#[derive(Debug, Clone)]
pub struct CreateLlmProviderRow {
    pub name: String,
    pub display_name: String,
    pub kind: String,
    pub base_url: Option<String>,
    pub credential: Option<StoredCredential>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateLlmProviderRow {
    pub display_name: Option<String>,
    pub kind: Option<String>,
    /// `Some(None)` clears the base URL
    pub base_url: Option<Option<String>>,
    pub credential: CredentialUpdate,
    pub enabled: Option<bool>,
}

// ============================================
// Models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct LlmModelRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub model_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub is_default: bool,
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Model joined with its provider
#[derive(Debug, Clone, FromRow)]
pub struct LlmModelWithProviderRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub model_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub is_default: bool,
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider_name: String,
    pub provider_display_name: String,
    pub provider_kind: String,
    pub provider_enabled: bool,
}

impl LlmModelWithProviderRow {
    pub fn into_model(self) -> LlmModelWithProvider {
        LlmModelWithProvider {
            id: self.id,
            provider_id: self.provider_id,
            model_id: self.model_id,
            display_name: self.display_name,
            enabled: self.enabled,
            is_default: self.is_default,
            metadata: parse_metadata(&self.metadata),
            created_at: self.created_at,
            updated_at: self.updated_at,
            provider_name: self.provider_name,
            provider_display_name: self.provider_display_name,
            provider_kind: self
                .provider_kind
                .parse()
                .unwrap_or(LlmProviderKind::OpenaiCompatible),
            provider_enabled: self.provider_enabled,
        }
    }
}

/// Everything the dispatcher needs to build a client for one model
#[derive(Debug, Clone, FromRow)]
pub struct InvocableModelRow {
    pub id: Uuid,
    pub model_id: String,
    pub metadata: sqlx::types::JsonValue,
    pub provider_id: Uuid,
    pub provider_name: String,
    pub provider_kind: String,
    pub provider_base_url: Option<String>,
    pub api_key_ciphertext: Option<String>,
    pub api_key_iv: Option<String>,
    pub api_key_tag: Option<String>,
}

impl InvocableModelRow {
    pub fn credential(&self) -> Option<EncryptedSecret> {
        credential_from_columns(
            self.api_key_ciphertext.as_ref(),
            self.api_key_iv.as_ref(),
            self.api_key_tag.as_ref(),
        )
    }

    /// True when some but not all credential columns are set
    pub fn credential_is_partial(&self) -> bool {
        let set = [
            self.api_key_ciphertext.is_some(),
            self.api_key_iv.is_some(),
            self.api_key_tag.is_some(),
        ];
        set.iter().any(|s| *s) && !set.iter().all(|s| *s)
    }
}

/// Model to insert during a catalog replace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLlmModelRow {
    pub model_id: String,
    pub display_name: String,
    pub metadata: ModelMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateLlmModelRow {
    pub display_name: Option<String>,
    pub enabled: Option<bool>,
    /// Only `Some(false)` is applied here; setting a default goes through
    /// `set_default_llm_model`
    pub is_default: Option<bool>,
}

/// Stored metadata; rows written by older versions fall back to defaults
pub fn parse_metadata(value: &sqlx::types::JsonValue) -> ModelMetadata {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn credential_from_columns(
    ciphertext: Option<&String>,
    iv: Option<&String>,
    tag: Option<&String>,
) -> Option<EncryptedSecret> {
    match (ciphertext, iv, tag) {
        (Some(ciphertext), Some(iv), Some(tag)) => Some(EncryptedSecret {
            ciphertext: ciphertext.clone(),
            iv: iv.clone(),
            auth_tag: tag.clone(),
        }),
        _ => None,
    }
}
