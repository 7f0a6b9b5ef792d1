// Model descriptor sources
//
// Two places tell us which models a provider offers:
// - the models.dev database (https://models.dev/api.json), cached with a TTL
// - the provider's own listing endpoint, for local runtimes and
//   OpenAI-compatible servers the database does not know
//
// Cache behaviour: fresh entries are served directly; an expired entry is
// refetched and, if that fails, served stale with a warning. A cache that was
// never populated reports the fetch error.

use async_trait::async_trait;
use parley_core::{
    DriverRegistry, LlmProviderKind, ModelCapabilities, ModelCost, ModelDescriptor,
    ModelLifecycle, ModelMetadata, ParleyError, Result,
};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::storage::LlmProviderRow;

pub const MODELS_DEV_TIMEOUT: Duration = Duration::from_secs(15);
pub const LOCAL_LISTING_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================
// models.dev wire types
// ============================================

/// models.dev payload: provider key -> provider entry
pub type ModelsDevDatabase = BTreeMap<String, ModelsDevProvider>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsDevProvider {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelsDevModel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsDevModel {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attachment: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub tool_call: bool,
    #[serde(default)]
    pub experimental: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub cost: Option<ModelsDevCost>,
    #[serde(default)]
    pub limit: Option<ModelsDevLimit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsDevCost {
    #[serde(default)]
    pub input: Option<f64>,
    #[serde(default)]
    pub output: Option<f64>,
    #[serde(default)]
    pub cache_read: Option<f64>,
    #[serde(default)]
    pub cache_write: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsDevLimit {
    #[serde(default)]
    pub context: Option<u32>,
    #[serde(default)]
    pub output: Option<u32>,
}

impl ModelsDevModel {
    fn into_descriptor(self, key: String) -> ModelDescriptor {
        let status = match self.status.as_deref() {
            Some("alpha") => ModelLifecycle::Alpha,
            Some("beta") => ModelLifecycle::Beta,
            Some("deprecated") => ModelLifecycle::Deprecated,
            _ => ModelLifecycle::Stable,
        };
        let cost = self.cost.unwrap_or_default();
        let limit = self.limit.unwrap_or_default();
        let model_id = self.id.unwrap_or(key);

        ModelDescriptor {
            display_name: self.name.unwrap_or_else(|| model_id.clone()),
            model_id,
            metadata: ModelMetadata {
                // models.dev reports 0 for unknown limits
                context_window: limit.context.filter(|v| *v > 0),
                max_output_tokens: limit.output.filter(|v| *v > 0),
                cost: ModelCost {
                    input: cost.input,
                    output: cost.output,
                    cache_read: cost.cache_read,
                    cache_write: cost.cache_write,
                },
                capabilities: ModelCapabilities {
                    streaming: true,
                    vision: self.attachment,
                    tools: self.tool_call,
                    reasoning: self.reasoning,
                },
                experimental: self.experimental,
                status,
                release_date: self.release_date,
            },
        }
    }
}

/// models.dev key for a provider name
pub fn models_dev_key(provider_name: &str) -> String {
    let name = provider_name.to_lowercase();
    match name.as_str() {
        "vertex" => "google-vertex".to_string(),
        "together" => "togetherai".to_string(),
        "fireworks" => "fireworks-ai".to_string(),
        _ => name,
    }
}

/// Descriptors of one database provider entry, in key order
pub fn descriptors_for(
    database: &ModelsDevDatabase,
    provider_name: &str,
) -> Option<Vec<ModelDescriptor>> {
    database.get(&models_dev_key(provider_name)).map(|provider| {
        provider
            .models
            .iter()
            .map(|(key, model)| model.clone().into_descriptor(key.clone()))
            .collect()
    })
}

// ============================================
// Remote model database
// ============================================

/// Where the model database comes from
#[async_trait]
pub trait ModelDatabaseSource: Send + Sync {
    async fn fetch(&self) -> Result<ModelsDevDatabase>;
}

/// HTTP source for models.dev
pub struct ModelsDevSource {
    client: Client,
    url: String,
}

impl ModelsDevSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(MODELS_DEV_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ModelDatabaseSource for ModelsDevSource {
    async fn fetch(&self) -> Result<ModelsDevDatabase> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ParleyError::fetch(format!("Failed to reach {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::fetch(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        response
            .json::<ModelsDevDatabase>()
            .await
            .map_err(|e| ParleyError::fetch(format!("Invalid model database payload: {}", e)))
    }
}

struct CachedDatabase {
    fetched_at: Instant,
    data: Arc<ModelsDevDatabase>,
}

/// TTL cache in front of a model database source
pub struct ModelsDevCache {
    source: Arc<dyn ModelDatabaseSource>,
    ttl: Duration,
    // Async mutex: concurrent callers wait for one refetch instead of racing
    state: Mutex<Option<CachedDatabase>>,
}

impl ModelsDevCache {
    pub fn new(source: Arc<dyn ModelDatabaseSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Current database, refetching when the entry is older than the TTL
    pub async fn database(&self) -> Result<Arc<ModelsDevDatabase>> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.data.clone());
            }
        }

        match self.source.fetch().await {
            Ok(data) => {
                let data = Arc::new(data);
                tracing::debug!(providers = data.len(), "Model database refreshed");
                *state = Some(CachedDatabase {
                    fetched_at: Instant::now(),
                    data: data.clone(),
                });
                Ok(data)
            }
            Err(e) => match state.as_ref() {
                Some(cached) => {
                    tracing::warn!(
                        error = %e,
                        age_secs = cached.fetched_at.elapsed().as_secs(),
                        "Model database refresh failed, serving stale copy"
                    );
                    Ok(cached.data.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Descriptors for a provider; `None` when the database has no entry for it
    pub async fn lookup(&self, provider_name: &str) -> Result<Option<Vec<ModelDescriptor>>> {
        let database = self.database().await?;
        Ok(descriptors_for(&database, provider_name))
    }

    /// Descriptors for a provider; unknown providers yield an empty list
    pub async fn models_for(&self, provider_name: &str) -> Result<Vec<ModelDescriptor>> {
        Ok(self.lookup(provider_name).await?.unwrap_or_default())
    }
}

// ============================================
// Local instance listing
// ============================================

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: String,
}

/// Lists models installed on a running instance
pub struct LocalModelSource {
    client: Client,
}

impl Default for LocalModelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalModelSource {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(LOCAL_LISTING_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// `GET {root}/api/tags`, where root is the base URL without `/v1`
    pub async fn ollama_models(&self, base_url: &str) -> Result<Vec<ModelDescriptor>> {
        let trimmed = base_url.trim_end_matches('/');
        let root = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        let url = format!("{}/api/tags", root);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ParleyError::fetch(format!("Failed to reach Ollama at {}: {}", root, e)))?;
        if !response.status().is_success() {
            return Err(ParleyError::fetch(format!(
                "Ollama model listing returned HTTP {}",
                response.status()
            )));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::fetch(format!("Invalid Ollama model listing: {}", e)))?;
        Ok(tags
            .models
            .into_iter()
            .map(|tag| ModelDescriptor::bare(tag.name))
            .collect())
    }

    /// `GET {base_url}/models` with the bearer key when present
    pub async fn compatible_models(
        &self,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<ModelDescriptor>> {
        let url = format!("{}/models", base_url.trim_end_matches('/'));

        let mut request = self.client.get(&url);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ParleyError::fetch(format!("Failed to reach {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(ParleyError::fetch(format!(
                "Model listing at {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let listing: ModelListResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::fetch(format!("Invalid model listing: {}", e)))?;
        Ok(listing
            .data
            .into_iter()
            .map(|entry| ModelDescriptor::bare(entry.id))
            .collect())
    }
}

// ============================================
// Source selection
// ============================================

/// Picks the descriptor source for a provider
pub struct ModelSources {
    cache: Arc<ModelsDevCache>,
    local: LocalModelSource,
    registry: Arc<DriverRegistry>,
}

impl ModelSources {
    pub fn new(cache: Arc<ModelsDevCache>, registry: Arc<DriverRegistry>) -> Self {
        Self {
            cache,
            local: LocalModelSource::new(),
            registry,
        }
    }

    pub fn cache(&self) -> &Arc<ModelsDevCache> {
        &self.cache
    }

    /// Descriptors currently offered by a provider
    ///
    /// - local runtimes: the instance itself (`/api/tags` for ollama,
    ///   `/models` otherwise), never the model database
    /// - official providers: the model database
    /// - other OpenAI-compatible providers: the model database when it knows
    ///   the provider, otherwise the endpoint's `/models` listing
    pub async fn get_models_for_provider(
        &self,
        provider: &LlmProviderRow,
        api_key: Option<&str>,
    ) -> Result<Vec<ModelDescriptor>> {
        let name = provider.name.to_lowercase();

        if self.registry.is_local_runtime(&name) {
            let base_url = self.require_base_url(provider)?;
            tracing::debug!(provider = %provider.name, %base_url, "Listing local runtime models");
            return if name == "ollama" {
                self.local.ollama_models(&base_url).await
            } else {
                self.local.compatible_models(&base_url, api_key).await
            };
        }

        match provider.kind() {
            LlmProviderKind::Official => self.cache.models_for(&name).await,
            LlmProviderKind::OpenaiCompatible => {
                match self.cache.lookup(&name).await {
                    Ok(Some(models)) => return Ok(models),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            provider = %provider.name,
                            error = %e,
                            "Model database unavailable, listing models from the endpoint"
                        );
                    }
                }

                let base_url = self.require_base_url(provider)?;
                self.local.compatible_models(&base_url, api_key).await
            }
        }
    }

    fn require_base_url(&self, provider: &LlmProviderRow) -> Result<String> {
        self.base_url(provider).ok_or_else(|| {
            ParleyError::validation(format!(
                "Provider '{}' has no base URL to list models from",
                provider.name
            ))
        })
    }

    fn base_url(&self, provider: &LlmProviderRow) -> Option<String> {
        provider
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.registry.default_base_url(&provider.name))
    }
}
