// Services layer for business logic
// Services own business logic and validation, calling storage directly

pub mod chat;
pub mod dispatcher;
pub mod llm_model;
pub mod llm_provider;
pub mod model_sources;
pub mod stream_checkpoint;

pub use chat::{ChatService, UiChunkStream};
pub use dispatcher::{CompletionDispatcher, InvocableModel};
pub use llm_model::LlmModelService;
pub use llm_provider::LlmProviderService;
pub use model_sources::{
    LocalModelSource, ModelDatabaseSource, ModelSources, ModelsDevCache, ModelsDevSource,
};
pub use stream_checkpoint::{CheckpointWriter, StreamCheckpointStore};
