// System prompt catalog
//
// Prompts are TOML `[[prompts]]` entries. The built-in file is embedded at
// compile time; SYSTEM_PROMPTS_PATH replaces it at startup.

use anyhow::{bail, Context, Result};
use parley_core::ParleyError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use utoipa::ToSchema;

const BUILTIN_PROMPTS: &str = include_str!("../../config/system_prompts.toml");

/// Id used when a chat request names no prompt
pub const DEFAULT_PROMPT_ID: &str = "default";

/// A selectable system prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemPrompt {
    #[schema(example = "default")]
    pub id: String,
    #[schema(example = "Helpful assistant")]
    pub name: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct SystemPromptFile {
    #[serde(default)]
    prompts: Vec<SystemPrompt>,
}

#[derive(Debug, Clone, Default)]
pub struct SystemPromptCatalog {
    prompts: Vec<SystemPrompt>,
}

impl SystemPromptCatalog {
    /// Catalog compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_PROMPTS).context("Built-in system prompts are invalid")
    }

    /// Load from `path` when given, otherwise the built-in catalog
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read system prompts from {}", path.display())
                })?;
                Self::from_toml(&raw)
                    .with_context(|| format!("Invalid system prompts in {}", path.display()))
            }
            None => Self::builtin(),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: SystemPromptFile = toml::from_str(raw)?;
        let mut seen = HashSet::new();
        for prompt in &file.prompts {
            if !seen.insert(prompt.id.as_str()) {
                bail!("Duplicate system prompt id: {}", prompt.id);
            }
        }
        Ok(Self {
            prompts: file.prompts,
        })
    }

    pub fn list(&self) -> &[SystemPrompt] {
        &self.prompts
    }

    pub fn get(&self, id: &str) -> Option<&SystemPrompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    /// Prompt content for a request
    ///
    /// No id selects the `default` entry if present; an unknown id is a
    /// validation error.
    pub fn resolve(&self, id: Option<&str>) -> Result<Option<&str>, ParleyError> {
        match id {
            Some(id) => self
                .get(id)
                .map(|p| Some(p.content.as_str()))
                .ok_or_else(|| ParleyError::validation(format!("Unknown system prompt: {}", id))),
            None => Ok(self.get(DEFAULT_PROMPT_ID).map(|p| p.content.as_str())),
        }
    }
}
