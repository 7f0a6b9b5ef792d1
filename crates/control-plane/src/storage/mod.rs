// Storage layer for the Parley control-plane
// Decision: Support both PostgreSQL (production) and in-memory (dev mode)
//
// - Database: PostgreSQL repository (sqlx, migrations under ./migrations)
// - InMemoryDatabase: HashMap-backed equivalent for dev mode and tests
// - StorageBackend: enum dispatch over the two
// - CredentialVault: AES-256-GCM encryption of provider API keys

pub mod backend;
pub mod encryption;
pub mod memory;
pub mod models;
pub mod repositories;

pub use backend::StorageBackend;
pub use encryption::{
    generate_encryption_key, mask, CredentialVault, EncryptedSecret, VaultError, VaultKeyMode,
};
pub use memory::InMemoryDatabase;
pub use models::*;
pub use repositories::Database;
