//! In-flight consent requests.
//!
//! Each prompt shown to the user owns one entry, keyed by a fresh id. The
//! entry is removed exactly once: by the decision that answers it, or by the
//! waiting request giving up (timeout, surface failure, caller dropped).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use super::surface::SurfaceHandle;
use crate::auth::{GrantCondition, PermissionLevel};

/// Why consent was not given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The user answered "no"
    Refused,
    /// The surface went away without an answer
    SurfaceClosed,
    /// Nobody answered within the configured timeout
    TimedOut,
    /// The surface could not be shown
    SurfaceUnavailable,
}

/// Resolution of one consent prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentOutcome {
    Granted(GrantCondition),
    Denied(DenialReason),
}

/// Decision message sent back by the consent surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDecision {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<GrantCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<PermissionLevel>,

    /// Set when the surface reports it was dismissed without an answer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub closed: bool,
}

impl ConsentDecision {
    pub fn new(id: impl Into<String>, condition: GrantCondition) -> Self {
        Self {
            id: id.into(),
            condition: Some(condition),
            host: None,
            level: None,
            closed: false,
        }
    }

    pub fn closed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            condition: None,
            host: None,
            level: None,
            closed: true,
        }
    }

    /// Outcome this decision resolves to. A decision without a condition
    /// counts as a refusal.
    pub fn outcome(&self) -> ConsentOutcome {
        if self.closed {
            return ConsentOutcome::Denied(DenialReason::SurfaceClosed);
        }
        match self.condition {
            Some(condition) if condition.is_grant() => ConsentOutcome::Granted(condition),
            _ => ConsentOutcome::Denied(DenialReason::Refused),
        }
    }
}

/// One request waiting on the user
#[derive(Debug)]
pub struct PendingConsent {
    pub origin: String,
    pub level: PermissionLevel,
    pub handle: Option<SurfaceHandle>,
    resolve: oneshot::Sender<ConsentOutcome>,
}

impl PendingConsent {
    /// Wake the waiting request. Returns false if it already went away.
    pub fn resolve(self, outcome: ConsentOutcome) -> (bool, Option<SurfaceHandle>) {
        let delivered = self.resolve.send(outcome).is_ok();
        (delivered, self.handle)
    }
}

/// Table of pending consents, owned by the broker
#[derive(Debug, Default)]
pub struct ConsentTable {
    pending: DashMap<String, PendingConsent>,
}

impl ConsentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending consent and return its id with the receiving end.
    pub fn register(
        &self,
        origin: &str,
        level: PermissionLevel,
    ) -> (String, oneshot::Receiver<ConsentOutcome>) {
        let (tx, rx) = oneshot::channel();
        let id = uuid::Uuid::new_v4().simple().to_string();

        self.pending.insert(
            id.clone(),
            PendingConsent {
                origin: origin.to_string(),
                level,
                handle: None,
                resolve: tx,
            },
        );

        debug!(consent_id = %id, origin = %origin, level = %level, "Registered pending consent");
        (id, rx)
    }

    /// Remember which surface shows `id`. Returns false when the consent was
    /// already resolved, in which case the caller should close the surface.
    pub fn attach_handle(&self, id: &str, handle: SurfaceHandle) -> bool {
        match self.pending.get_mut(id) {
            Some(mut entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Remove and return the entry for `id`. Only the first call succeeds.
    pub fn take(&self, id: &str) -> Option<PendingConsent> {
        self.pending.remove(id).map(|(_, pending)| pending)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
