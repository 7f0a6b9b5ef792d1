// Parley Core
//
// DB-agnostic building blocks shared by the server, the client and the CLI.
//
// Key design decisions:
// - LlmDriver is the one contract every upstream vendor is normalized to
// - DriverRegistry is a lookup table from provider name to a pure factory;
//   provider crates register their variants, unknown names fall back to the
//   generic OpenAI-compatible driver
// - Errors are a single typed taxonomy (ParleyError) resolved before any stream opens
// - The UI message stream framing is defined here so producer and consumer agree

pub mod chat;
pub mod error;
pub mod llm_driver_registry;
pub mod llm_models;
pub mod openai_protocol;
pub mod telemetry;
pub mod ui_stream;

pub use chat::{ChatRequest, ChatRequestMessage, ChatRole};
pub use error::{ParleyError, Result};
pub use llm_driver_registry::{
    AmbientConfig, BoxedLlmDriver, ClientOptions, DriverFactory, DriverRegistry, InvocationStyle,
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole, LlmResponse,
    LlmResponseStream, LlmStreamEvent, ProviderCapabilities, ProviderVariant,
};
pub use llm_models::{
    LlmModel, LlmModelWithProvider, LlmProvider, LlmProviderKind, ModelCapabilities, ModelCost,
    ModelDescriptor, ModelLifecycle, ModelMetadata,
};
pub use openai_protocol::OpenAIProtocolLlmDriver;
pub use ui_stream::{UiChunk, UiFrame, UiStreamFramer};
