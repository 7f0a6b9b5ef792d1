// Anthropic Driver Implementation
//
// Provides the LlmDriver for Anthropic's Messages API and registers it under
// the "anthropic" provider name.

mod driver;


pub use driver::{register_driver, AnthropicLlmDriver, DEFAULT_BASE_URL};
pub use parley_core::llm_driver_registry::DriverRegistry;
