//! Read access to the custodial secret and relay preferences.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{KeyValueStore, PRIVATE_KEY_KEY, RELAYS_KEY};
use crate::crypto::{get_public_key, SecretKey};
use crate::types::{BrokerError, Result};

/// Read/write flags for one relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPolicy {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

/// Relay URL → policy
pub type RelayMap = BTreeMap<String, RelayPolicy>;

/// Holder of the single custodial secret
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn KeyValueStore>,
}

impl KeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the secret, `None` when no key has been provisioned.
    pub async fn read_private_key(&self) -> Result<Option<SecretKey>> {
        match self.store.get(PRIVATE_KEY_KEY).await? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(hex)) if hex.is_empty() => Ok(None),
            Some(Value::String(hex)) => SecretKey::from_hex(&hex).map(Some).map_err(|_| {
                BrokerError::Storage("stored private key is not a valid secp256k1 scalar".into())
            }),
            Some(_) => Err(BrokerError::Storage(
                "stored private key has an unexpected type".into(),
            )),
        }
    }

    /// Replace the secret.
    pub async fn set_private_key(&self, secret: &SecretKey) -> Result<()> {
        self.store
            .set(PRIVATE_KEY_KEY, Value::String(secret.to_hex()))
            .await?;
        info!(public_key = %get_public_key(secret)?, "Stored private key");
        Ok(())
    }

    /// Read the relay preferences, `None` when never configured.
    pub async fn read_relays(&self) -> Result<Option<RelayMap>> {
        match self.store.get(RELAYS_KEY).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BrokerError::Storage(format!("stored relays are malformed: {e}"))),
        }
    }

    pub async fn set_relays(&self, relays: &RelayMap) -> Result<()> {
        let value = serde_json::to_value(relays)
            .map_err(|e| BrokerError::Internal(format!("failed to encode relays: {e}")))?;
        self.store.set(RELAYS_KEY, value).await
    }
}
