// Server configuration
//
// Environment-driven settings (after dotenvy) plus the embedded system prompt
// catalog.

pub mod system_prompts;

pub use system_prompts::{SystemPrompt, SystemPromptCatalog};

use anyhow::{Context, Result};
use parley_core::AmbientConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_MODELS_DEV_URL: &str = "https://models.dev/api.json";
pub const DEFAULT_MODEL_DB_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_STREAM_CHECKPOINT_RETENTION_SECS: u64 = 300;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Settings read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Postgres URL; absent means the in-memory backend
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub secrets_encryption_key: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub models_dev_url: String,
    pub model_db_cache_ttl: Duration,
    pub stream_checkpoint_retention: Duration,
    pub system_prompts_path: Option<PathBuf>,
    pub default_max_output_tokens: u32,
    pub ambient: AmbientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            secrets_encryption_key: None,
            cors_allowed_origins: Vec::new(),
            models_dev_url: DEFAULT_MODELS_DEV_URL.to_string(),
            model_db_cache_ttl: Duration::from_secs(DEFAULT_MODEL_DB_CACHE_TTL_SECS),
            stream_checkpoint_retention: Duration::from_secs(
                DEFAULT_STREAM_CHECKPOINT_RETENTION_SECS,
            ),
            system_prompts_path: None,
            default_max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            ambient: AmbientConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through a variable lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got '{}'", v))?,
            None => defaults.port,
        };

        let secs = |name: &str, default: Duration| -> Result<Duration> {
            match get(name) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{} must be a number of seconds, got '{}'", name, v)),
                None => Ok(default),
            }
        };

        let default_max_output_tokens = match get("DEFAULT_MAX_OUTPUT_TOKENS") {
            Some(v) => v.trim().parse::<u32>().with_context(|| {
                format!("DEFAULT_MAX_OUTPUT_TOKENS must be a number, got '{}'", v)
            })?,
            None => defaults.default_max_output_tokens,
        };

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: get("DATABASE_URL"),
            host: get("HOST").unwrap_or(defaults.host),
            port,
            secrets_encryption_key: get("SECRETS_ENCRYPTION_KEY"),
            cors_allowed_origins,
            models_dev_url: get("MODELS_DEV_URL").unwrap_or(defaults.models_dev_url),
            model_db_cache_ttl: secs("MODEL_DB_CACHE_TTL_SECS", defaults.model_db_cache_ttl)?,
            stream_checkpoint_retention: secs(
                "STREAM_CHECKPOINT_RETENTION_SECS",
                defaults.stream_checkpoint_retention,
            )?,
            system_prompts_path: get("SYSTEM_PROMPTS_PATH").map(PathBuf::from),
            default_max_output_tokens,
            ambient: AmbientConfig {
                vertex_project: get("GOOGLE_VERTEX_PROJECT"),
                vertex_location: get("GOOGLE_VERTEX_LOCATION"),
                vertex_access_token: get("GOOGLE_VERTEX_ACCESS_TOKEN"),
            },
        })
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
