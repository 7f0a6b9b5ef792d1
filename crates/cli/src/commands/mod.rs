pub mod chat;
pub mod chats;
pub mod models;
pub mod providers;
