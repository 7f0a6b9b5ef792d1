// Parley API server
// Decision: No DATABASE_URL means dev mode on the in-memory backend, announced loudly
// Decision: No SECRETS_ENCRYPTION_KEY means an ephemeral vault key, announced loudly

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use parley_control_plane::config::{ServerConfig, SystemPromptCatalog};
use parley_control_plane::openapi::ApiDoc;
use parley_control_plane::services::ModelsDevSource;
use parley_control_plane::storage::{CredentialVault, StorageBackend};
use parley_control_plane::{build_router, default_registry, AppContext};
use parley_core::telemetry::{init_tracing, TelemetryConfig};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG / LOG_LEVEL override the default filter
    init_tracing(
        TelemetryConfig::from_env("parley-control-plane")
            .with_default_filter("parley_control_plane=debug,tower_http=debug,info"),
    );
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "parley-control-plane starting...");

    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    let db = match &config.database_url {
        Some(url) => {
            let db = StorageBackend::postgres(url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            db
        }
        None => {
            tracing::warn!(
                "DATABASE_URL is not set. Running on the IN-MEMORY backend: \
                 providers and models are lost on restart."
            );
            StorageBackend::in_memory()
        }
    };

    let vault = CredentialVault::from_config(config.secrets_encryption_key.as_deref())
        .context("Invalid SECRETS_ENCRYPTION_KEY")?;
    tracing::info!(
        mode = %vault.mode(),
        key_id = %vault.key_id(),
        fingerprint = %vault.fingerprint(),
        "Credential vault ready"
    );

    let prompts = SystemPromptCatalog::load(config.system_prompts_path.as_deref())
        .context("Failed to load system prompts")?;
    tracing::info!(count = prompts.list().len(), "System prompts loaded");

    let registry = default_registry();
    tracing::info!(providers = ?registry.provider_names(), "Driver registry ready");

    let cors_origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let bind_address = config.bind_address();

    let ctx = AppContext {
        model_source: Arc::new(ModelsDevSource::new(config.models_dev_url.clone())),
        config,
        db: Arc::new(db),
        vault: Arc::new(vault),
        registry: Arc::new(registry),
        prompts: Arc::new(prompts),
    };

    let app = build_router(ctx)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // Only needed when the UI is served from a different origin than the API
    let app = if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::CACHE_CONTROL,
                ])
                .expose_headers([header::HeaderName::from_static(
                    "x-vercel-ai-ui-message-stream",
                )])
                .allow_credentials(true),
        )
    };

    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    tracing::info!("HTTP server listening on {}", bind_address);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
