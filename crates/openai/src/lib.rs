// OpenAI Driver Implementation
//
// Registers the official OpenAI variant (direct, Responses API) and the
// OpenAI-compatible vendor table (chat method, core chat-completions driver).

mod driver;

#[cfg(test)]
mod tests;

pub use driver::OpenAILlmDriver;
pub use parley_core::llm_driver_registry::DriverRegistry;

use parley_core::llm_driver_registry::{
    BoxedLlmDriver, ClientOptions, InvocationStyle, ProviderCapabilities, ProviderVariant,
};
use parley_core::openai_protocol::OpenAIProtocolLlmDriver;

/// An OpenAI-compatible vendor known by name
#[derive(Debug, Clone, Copy)]
pub struct CompatibleVendor {
    pub name: &'static str,
    pub base_url: &'static str,
    /// Local runtimes run without credentials
    pub requires_api_key: bool,
    pub capabilities: ProviderCapabilities,
}

const fn caps(vision: bool, tools: bool) -> ProviderCapabilities {
    ProviderCapabilities {
        streaming: true,
        vision,
        tools,
    }
}

/// OpenAI-compatible vendors with their default endpoints
pub const COMPATIBLE_VENDORS: &[CompatibleVendor] = &[
    CompatibleVendor {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        requires_api_key: false,
        capabilities: caps(true, true),
    },
    CompatibleVendor {
        name: "lmstudio",
        base_url: "http://localhost:1234/v1",
        requires_api_key: false,
        capabilities: caps(false, true),
    },
    CompatibleVendor {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        requires_api_key: true,
        capabilities: caps(true, true),
    },
    CompatibleVendor {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        requires_api_key: true,
        capabilities: caps(false, true),
    },
    CompatibleVendor {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        requires_api_key: true,
        capabilities: caps(false, true),
    },
    CompatibleVendor {
        name: "mistral",
        base_url: "https://api.mistral.ai/v1",
        requires_api_key: true,
        capabilities: caps(true, true),
    },
    CompatibleVendor {
        name: "xai",
        base_url: "https://api.x.ai/v1",
        requires_api_key: true,
        capabilities: caps(true, true),
    },
    CompatibleVendor {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        requires_api_key: true,
        capabilities: caps(true, true),
    },
    CompatibleVendor {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        requires_api_key: true,
        capabilities: caps(true, true),
    },
];

/// Look up a compatible vendor by name
pub fn compatible_vendor(name: &str) -> Option<&'static CompatibleVendor> {
    COMPATIBLE_VENDORS
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
}

/// Register the OpenAI variants with the driver registry
///
/// This should be called at application startup.
///
/// ```ignore
/// let mut registry = DriverRegistry::new();
/// parley_openai::register_drivers(&mut registry);
/// ```
pub fn register_drivers(registry: &mut DriverRegistry) {
    registry.register(
        "openai",
        ProviderVariant::new(InvocationStyle::Direct, |options: &ClientOptions| {
            let api_key = options.require_api_key("openai")?;
            let driver = match options.base_url.as_deref() {
                Some(url) => OpenAILlmDriver::with_base_url(api_key, url),
                None => OpenAILlmDriver::new(api_key),
            };
            Ok(Box::new(driver) as BoxedLlmDriver)
        })
        .with_capabilities(caps(true, true))
        .with_default_base_url(driver::DEFAULT_BASE_URL),
    );

    for vendor in COMPATIBLE_VENDORS {
        let vendor = *vendor;
        let variant =
            ProviderVariant::new(InvocationStyle::ChatMethod, move |options: &ClientOptions| {
                let api_key = if vendor.requires_api_key {
                    Some(options.require_api_key(vendor.name)?.to_string())
                } else {
                    options.api_key.clone()
                };
                let base_url = options.base_url.as_deref().unwrap_or(vendor.base_url);
                Ok(Box::new(OpenAIProtocolLlmDriver::compatible(
                    vendor.name,
                    api_key,
                    base_url,
                )) as BoxedLlmDriver)
            })
            .with_capabilities(vendor.capabilities)
            .with_default_base_url(vendor.base_url);
        let variant = if vendor.requires_api_key {
            variant
        } else {
            variant.as_local_runtime()
        };
        registry.register(vendor.name, variant);
    }

    tracing::debug!(
        vendors = COMPATIBLE_VENDORS.len(),
        "Registered OpenAI and OpenAI-compatible drivers"
    );
}
