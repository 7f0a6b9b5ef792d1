// Parley client
//
// Local chat persistence plus the controller that drives one streaming turn
// at a time against the Parley API.

pub mod controller;
pub mod history;
pub mod store;
pub mod transport;

pub use controller::{ChatStreamController, ControllerError, ResumeOutcome, TurnStatus};
pub use history::{merge_messages, prepare_history, DisplayMessage, MAX_HISTORY_MESSAGES};
pub use store::{Chat, LocalStore, Message, NewMessage, OwnerScope, StoreError};
pub use transport::{ChatTransport, ChunkStream, HttpChatTransport, TransportError};
