// Google Driver Implementation
//
// Registers two variants over the Gemini streaming protocol:
// - "google": Gemini API, authenticated with the stored API key
// - "vertex": Vertex AI, scoped by GOOGLE_VERTEX_PROJECT / GOOGLE_VERTEX_LOCATION,
//   authenticated with the stored credential or GOOGLE_VERTEX_ACCESS_TOKEN

mod driver;


pub use driver::{vertex_publisher_root, GeminiLlmDriver, DEFAULT_BASE_URL};
pub use parley_core::llm_driver_registry::DriverRegistry;

use parley_core::error::{ParleyError, Result};
use parley_core::llm_driver_registry::{
    BoxedLlmDriver, ClientOptions, InvocationStyle, ProviderCapabilities, ProviderVariant,
};

const CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    streaming: true,
    vision: true,
    tools: true,
};

/// Register the Google variants with the driver registry
pub fn register_drivers(registry: &mut DriverRegistry) {
    registry.register(
        "google",
        ProviderVariant::new(InvocationStyle::Direct, |options: &ClientOptions| {
            let api_key = options.require_api_key("google")?;
            let driver = match options.base_url.as_deref() {
                Some(url) => GeminiLlmDriver::with_base_url(api_key, url),
                None => GeminiLlmDriver::new(api_key),
            };
            Ok(Box::new(driver) as BoxedLlmDriver)
        })
        .with_capabilities(CAPABILITIES)
        .with_default_base_url(DEFAULT_BASE_URL),
    );

    registry.register(
        "vertex",
        ProviderVariant::new(InvocationStyle::Direct, build_vertex).with_capabilities(CAPABILITIES),
    );
}

fn build_vertex(options: &ClientOptions) -> Result<BoxedLlmDriver> {
    let ambient = &options.ambient;
    let project = ambient.vertex_project.as_deref().ok_or_else(|| {
        ParleyError::misconfigured("Vertex AI requires GOOGLE_VERTEX_PROJECT to be set")
    })?;
    let location = ambient.vertex_location.as_deref().ok_or_else(|| {
        ParleyError::misconfigured("Vertex AI requires GOOGLE_VERTEX_LOCATION to be set")
    })?;
    let token = options
        .api_key
        .as_deref()
        .or(ambient.vertex_access_token.as_deref())
        .ok_or_else(|| {
            ParleyError::misconfigured(
                "Vertex AI requires an access token (provider credential or GOOGLE_VERTEX_ACCESS_TOKEN)",
            )
        })?;

    let driver = match options.base_url.as_deref() {
        Some(root) => GeminiLlmDriver::vertex_with_root(root, token),
        None => GeminiLlmDriver::vertex(project, location, token),
    };
    Ok(Box::new(driver))
}
