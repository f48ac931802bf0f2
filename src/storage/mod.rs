//! Durable state for Keyward
//!
//! Everything is kept in one async key-value store under distinct keys:
//!
//! - `private_key`: the custodial secret (hex), read through [`KeyStore`]
//! - `relays`: the user's relay preferences, read through [`KeyStore`]
//! - `permissions`: origin → [`PermissionRecord`], read and written through
//!   [`PermissionStore`]
//!
//! Two backends are provided: [`MemoryStore`] for tests and ephemeral runs,
//! and [`FileStore`] which persists a single JSON document on disk.

pub mod file;
pub mod keys;
pub mod memory;
pub mod permissions;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::Result;

pub use file::FileStore;
pub use keys::{KeyStore, RelayMap, RelayPolicy};
pub use memory::MemoryStore;
pub use permissions::{PermissionRecord, PermissionStore, DEFAULT_EXPIRABLE_TTL};

/// Key holding the hex-encoded secret
pub const PRIVATE_KEY_KEY: &str = "private_key";

/// Key holding the relay preferences
pub const RELAYS_KEY: &str = "relays";

/// Key holding the origin → permission table
pub const PERMISSIONS_KEY: &str = "permissions";

/// Async key-value interface the broker persists through.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
