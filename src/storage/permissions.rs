//! Standing permissions per requesting origin.
//!
//! At most one record per origin; the last write wins. Records granted with
//! the `expirable` condition lapse after a TTL and are pruned lazily.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{KeyValueStore, PERMISSIONS_KEY};
use crate::auth::{GrantCondition, PermissionLevel};
use crate::types::{BrokerError, Result};

/// Default lifetime of an `expirable` grant (5 minutes)
pub const DEFAULT_EXPIRABLE_TTL: Duration = Duration::from_secs(5 * 60);

/// A standing grant for one origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub level: PermissionLevel,
    pub condition: GrantCondition,
    /// Unix seconds when the grant was stored
    pub created_at: i64,
}

impl PermissionRecord {
    /// Whether the record has lapsed at `now` (unix seconds)
    pub fn is_expired(&self, now: i64, ttl: Duration) -> bool {
        self.condition == GrantCondition::Expirable
            && self
                .created_at
                .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
                <= now
    }
}

type PermissionTable = BTreeMap<String, PermissionRecord>;

/// Accessor for the origin → permission table
pub struct PermissionStore {
    store: Arc<dyn KeyValueStore>,
    expirable_ttl: Duration,
    /// Serializes read-modify-write cycles on the shared table
    write_lock: Mutex<()>,
}

impl PermissionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_EXPIRABLE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, expirable_ttl: Duration) -> Self {
        Self {
            store,
            expirable_ttl,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<PermissionTable> {
        match self.store.get(PERMISSIONS_KEY).await? {
            None | Some(Value::Null) => Ok(PermissionTable::new()),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                BrokerError::Storage(format!("stored permissions are malformed: {e}"))
            }),
        }
    }

    async fn save(&self, table: &PermissionTable) -> Result<()> {
        let value = serde_json::to_value(table)
            .map_err(|e| BrokerError::Internal(format!("failed to encode permissions: {e}")))?;
        self.store.set(PERMISSIONS_KEY, value).await
    }

    /// Drop lapsed records, returning how many were removed.
    fn prune(&self, table: &mut PermissionTable, now: i64) -> usize {
        let before = table.len();
        table.retain(|_, record| !record.is_expired(now, self.expirable_ttl));
        before - table.len()
    }

    /// Load the table with lapsed records removed (and the removal persisted).
    async fn load_live(&self) -> Result<PermissionTable> {
        let mut table = self.load().await?;
        let now = Utc::now().timestamp();
        if table.values().any(|r| r.is_expired(now, self.expirable_ttl)) {
            let _guard = self.write_lock.lock().await;
            // re-read under the lock so a concurrent grant is not lost
            table = self.load().await?;
            let removed = self.prune(&mut table, now);
            if removed > 0 {
                self.save(&table).await?;
                debug!(removed, "Pruned expired permissions");
            }
        }
        Ok(table)
    }

    /// Standing level for `origin`, [`PermissionLevel::NONE`] when none.
    pub async fn read_level(&self, origin: &str) -> Result<PermissionLevel> {
        Ok(self
            .load_live()
            .await?
            .get(origin)
            .map(|record| record.level)
            .unwrap_or_default())
    }

    /// Full record for `origin`, if any.
    pub async fn get(&self, origin: &str) -> Result<Option<PermissionRecord>> {
        Ok(self.load_live().await?.remove(origin))
    }

    /// Insert or replace the standing grant for `origin`.
    ///
    /// Only `forever` and `expirable` grants become standing permission.
    pub async fn upsert(
        &self,
        origin: &str,
        level: PermissionLevel,
        condition: GrantCondition,
    ) -> Result<PermissionRecord> {
        if !condition.persists() {
            return Err(BrokerError::Internal(format!(
                "condition {} cannot be stored",
                condition
            )));
        }

        let record = PermissionRecord {
            level,
            condition,
            created_at: Utc::now().timestamp(),
        };

        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        self.prune(&mut table, record.created_at);
        table.insert(origin.to_string(), record.clone());
        self.save(&table).await?;

        info!(
            origin = %origin,
            level = %level,
            condition = %condition,
            "Stored permission"
        );
        Ok(record)
    }

    /// Revoke `origin`'s standing permission. Returns whether one existed.
    pub async fn remove(&self, origin: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        let existed = table.remove(origin).is_some();
        if existed {
            self.save(&table).await?;
            info!(origin = %origin, "Revoked permission");
        }
        Ok(existed)
    }

    /// All live records, keyed by origin.
    pub async fn list(&self) -> Result<BTreeMap<String, PermissionRecord>> {
        self.load_live().await
    }
}
