// Local chat store (SQLite)
//
// Every statement is filtered by the store's owner scope. Guest rows carry the
// empty-string owner, so switching scope never surfaces another owner's data.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::ChatRole;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Automatic titles keep this many characters before the ellipsis
pub const TITLE_MAX_CHARS: usize = 50;

const GUEST_OWNER: &str = "";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Assistant messages must have content")]
    EmptyAssistantMessage,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Whose chats a store reads and writes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    #[default]
    Guest,
    User(String),
}

impl OwnerScope {
    /// `None` or a blank id is the guest scope
    pub fn from_owner(owner_id: Option<&str>) -> Self {
        match owner_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => OwnerScope::User(id.to_string()),
            None => OwnerScope::Guest,
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            OwnerScope::Guest => None,
            OwnerScope::User(id) => Some(id),
        }
    }

    fn key(&self) -> &str {
        self.owner_id().unwrap_or(GUEST_OWNER)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: Option<String>,
    /// `None` for guest chats
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub owner_id: Option<String>,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub role: ChatRole,
    pub content: String,
}

impl NewMessage {
    pub fn new(chat_id: impl Into<String>, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, FromRow)]
struct ChatRow {
    id: String,
    title: Option<String>,
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ChatRow> for Chat {
    fn from(row: ChatRow) -> Self {
        Chat {
            id: row.id,
            title: row.title,
            owner_id: owner_from_key(row.owner_id),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    owner_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let role = ChatRole::from_str(&row.role)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;
        Ok(Message {
            id: row.id,
            chat_id: row.chat_id,
            owner_id: owner_from_key(row.owner_id),
            role,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

fn owner_from_key(key: String) -> Option<String> {
    (!key.is_empty()).then_some(key)
}

/// Fixed-width UTC timestamp so TEXT ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Title derived from a first user message
pub fn title_from_message(content: &str) -> Option<String> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }
    if content.chars().count() <= TITLE_MAX_CHARS {
        return Some(content.to_string());
    }
    let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
    Some(format!("{}...", truncated.trim_end()))
}

/// SQLite-backed chat history bound to one owner scope
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    owner: OwnerScope,
}

impl LocalStore {
    /// Open (creating if needed) a store file and run migrations
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, for tests and throwaway sessions
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // One connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            owner: OwnerScope::Guest,
        })
    }

    /// View of the same database scoped to another owner
    pub fn with_owner(&self, owner: OwnerScope) -> Self {
        Self {
            pool: self.pool.clone(),
            owner,
        }
    }

    pub fn owner(&self) -> &OwnerScope {
        &self.owner
    }

    pub async fn create_chat(&self, title: Option<&str>) -> Result<Chat> {
        let now = Utc::now();
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        let row = sqlx::query_as::<_, ChatRow>(
            r#"
            INSERT INTO chats (id, title, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, title, owner_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(title)
        .bind(self.owner.key())
        .bind(timestamp(now))
        .bind(timestamp(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Append a message, touching the chat and titling it on the first user message
    pub async fn add_message(&self, input: NewMessage) -> Result<Message> {
        if input.role == ChatRole::Assistant && input.content.trim().is_empty() {
            return Err(StoreError::EmptyAssistantMessage);
        }

        let mut tx = self.pool.begin().await?;

        let title: Option<Option<String>> =
            sqlx::query_scalar("SELECT title FROM chats WHERE id = ? AND owner_id = ?")
                .bind(&input.chat_id)
                .bind(self.owner.key())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(title) = title else {
            return Err(StoreError::ChatNotFound(input.chat_id));
        };

        let now = timestamp(Utc::now());
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, chat_id, owner_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, chat_id, owner_id, role, content, created_at
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(&input.chat_id)
        .bind(self.owner.key())
        .bind(input.role.as_str())
        .bind(&input.content)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        let new_title = match (title, input.role) {
            (None, ChatRole::User) => title_from_message(&input.content),
            _ => None,
        };

        sqlx::query(
            r#"
            UPDATE chats
            SET updated_at = ?, title = COALESCE(title, ?)
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(&now)
        .bind(new_title)
        .bind(&input.chat_id)
        .bind(self.owner.key())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// Messages of a chat in creation order
    pub async fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, chat_id, owner_id, role, content, created_at
            FROM messages
            WHERE chat_id = ? AND owner_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(chat_id)
        .bind(self.owner.key())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    /// Chats, most recently updated first
    pub async fn get_chats(&self) -> Result<Vec<Chat>> {
        let rows = sqlx::query_as::<_, ChatRow>(
            r#"
            SELECT id, title, owner_id, created_at, updated_at
            FROM chats
            WHERE owner_id = ?
            ORDER BY updated_at DESC, rowid DESC
            "#,
        )
        .bind(self.owner.key())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chat::from).collect())
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query_as::<_, ChatRow>(
            r#"
            SELECT id, title, owner_id, created_at, updated_at
            FROM chats
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(chat_id)
        .bind(self.owner.key())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Chat::from))
    }

    /// Delete a chat and its messages; false if the chat is not in scope
    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ? AND owner_id = ?")
            .bind(chat_id)
            .bind(self.owner.key())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM chats WHERE id = ? AND owner_id = ?")
            .bind(chat_id)
            .bind(self.owner.key())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }
}
