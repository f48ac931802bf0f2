//! Authorization Broker
//!
//! Receives capability requests from untrusted callers, checks the origin's
//! standing permission, asks the user when that is not enough, and only then
//! touches the custodial key.
//!
//! # Ordering
//!
//! For any one request the secret is read strictly after the permission
//! check (and the consent prompt, if one was needed) resolved to a grant.
//! A grant that becomes standing permission is stored before the waiting
//! request is woken.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::consent::{ConsentDecision, ConsentOutcome, ConsentTable, DenialReason};
use super::surface::{ConsentPrompt, ConsentSurface};
use crate::auth::{OperationType, PermissionLevel};
use crate::crypto::{finalize_event, get_public_key, nip04, Event, SecretKey};
use crate::storage::{KeyStore, KeyValueStore, PermissionStore, DEFAULT_EXPIRABLE_TTL};
use crate::types::{BrokerError, Response, Result};

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Give up on an unanswered prompt after this long (None = wait forever)
    pub consent_timeout: Option<Duration>,

    /// Lifetime of `expirable` grants
    pub expirable_ttl: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            consent_timeout: None,
            expirable_ttl: DEFAULT_EXPIRABLE_TTL,
        }
    }
}

/// One inbound call from an untrusted caller
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
    /// Wire name of the operation (may be unknown)
    pub operation: String,
    pub params: Value,
    pub origin: String,
}

impl CapabilityRequest {
    pub fn new(operation: impl Into<String>, params: Value, origin: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params,
            origin: origin.into(),
        }
    }
}

#[derive(Deserialize)]
struct SignEventParams {
    event: Option<Value>,
}

#[derive(Deserialize)]
struct EncryptParams {
    peer: String,
    plaintext: String,
}

#[derive(Deserialize)]
struct DecryptParams {
    peer: String,
    ciphertext: String,
}

fn parse_params<T: DeserializeOwned>(operation: OperationType, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| BrokerError::InvalidParams(format!("bad params for {operation}: {e}")))
}

/// Removes a pending consent and dismisses its surface if the waiting
/// request stops waiting for any reason other than a decision.
struct PendingGuard<'a> {
    consents: &'a ConsentTable,
    surface: &'a dyn ConsentSurface,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(pending) = self.consents.take(&self.id) {
            debug!(consent_id = %self.id, origin = %pending.origin, "Abandoned pending consent");
            if let Some(handle) = pending.handle {
                self.surface.close(&handle);
            }
        }
    }
}

/// The authorization broker
pub struct Broker {
    config: BrokerConfig,
    permissions: PermissionStore,
    keys: KeyStore,
    consents: ConsentTable,
    surface: Arc<dyn ConsentSurface>,
}

impl Broker {
    /// Create a broker persisting through `store` and prompting via `surface`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        surface: Arc<dyn ConsentSurface>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            permissions: PermissionStore::with_ttl(store.clone(), config.expirable_ttl),
            keys: KeyStore::new(store),
            consents: ConsentTable::new(),
            surface,
            config,
        }
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Number of prompts currently awaiting an answer
    pub fn pending_consents(&self) -> usize {
        self.consents.len()
    }

    /// Handle one capability request end to end.
    ///
    /// Never fails: every problem becomes an error response.
    pub async fn handle_request(&self, request: CapabilityRequest) -> Response {
        let CapabilityRequest {
            operation,
            params,
            origin,
        } = request;

        let operation = match operation.parse::<OperationType>() {
            Ok(op) => op,
            Err(e) => {
                warn!(origin = %origin, operation = %operation, "Rejected unknown operation");
                return Response::error(e.into_body(&operation));
            }
        };

        if let Err(e) = self.authorize(operation, &origin, &params).await {
            return Response::error(e.into_body(operation.as_str()));
        }

        match self.execute(operation, params).await {
            Ok(value) => {
                debug!(origin = %origin, operation = %operation, "Operation completed");
                Response::Success(value)
            }
            Err(e) => {
                debug!(origin = %origin, operation = %operation, error = %e, "Operation failed");
                Response::error(e.into_body(&format!("{} requested by {}", operation, origin)))
            }
        }
    }

    /// Resolve the origin's standing permission, prompting when insufficient.
    async fn authorize(&self, operation: OperationType, origin: &str, params: &Value) -> Result<()> {
        let required = operation.required_permission();
        let level = match self.permissions.read_level(origin).await {
            Ok(level) => level,
            Err(e) => {
                warn!(origin = %origin, error = %e, "Failed to read permission, assuming none");
                PermissionLevel::NONE
            }
        };

        if level.satisfies(required) {
            debug!(origin = %origin, operation = %operation, level = %level, "Standing permission");
            return Ok(());
        }

        match self.request_consent(origin, required, params).await {
            ConsentOutcome::Granted(condition) => {
                debug!(origin = %origin, operation = %operation, condition = %condition, "Consent granted");
                Ok(())
            }
            ConsentOutcome::Denied(reason) => {
                info!(origin = %origin, operation = %operation, reason = ?reason, "Consent denied");
                Err(BrokerError::PermissionDenied { required })
            }
        }
    }

    /// Show a prompt and suspend until it is answered.
    async fn request_consent(
        &self,
        origin: &str,
        required: PermissionLevel,
        params: &Value,
    ) -> ConsentOutcome {
        let (id, rx) = self.consents.register(origin, required);
        let _guard = PendingGuard {
            consents: &self.consents,
            surface: self.surface.as_ref(),
            id: id.clone(),
        };

        let prompt = ConsentPrompt {
            id: id.clone(),
            host: origin.to_string(),
            level: required,
            params: params.clone(),
        };

        let handle = match self.surface.open(&prompt).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(consent_id = %id, origin = %origin, error = %e, "Failed to open consent surface");
                return ConsentOutcome::Denied(DenialReason::SurfaceUnavailable);
            }
        };

        if !self.consents.attach_handle(&id, handle.clone()) {
            // answered before we got here; the resolver could not close it
            self.surface.close(&handle);
        }

        info!(
            consent_id = %id,
            origin = %origin,
            level = %required,
            asks = %prompt.description(),
            "Awaiting consent"
        );

        let outcome = match self.config.consent_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    warn!(consent_id = %id, origin = %origin, "Consent timed out");
                    Some(ConsentOutcome::Denied(DenialReason::TimedOut))
                }
            },
            None => rx.await.ok(),
        };

        outcome.unwrap_or(ConsentOutcome::Denied(DenialReason::SurfaceClosed))
    }

    /// Apply a decision reported by the consent surface.
    ///
    /// Unknown or already-resolved ids are ignored.
    pub async fn handle_decision(&self, decision: ConsentDecision) {
        let Some(pending) = self.consents.take(&decision.id) else {
            debug!(consent_id = %decision.id, "No pending consent for decision, ignoring");
            return;
        };

        if let Some(host) = decision.host.as_deref() {
            if host != pending.origin {
                warn!(
                    consent_id = %decision.id,
                    expected = %pending.origin,
                    reported = %host,
                    "Decision host mismatch, using the requesting origin"
                );
            }
        }

        let outcome = decision.outcome();
        if let ConsentOutcome::Granted(condition) = outcome {
            if condition.persists() {
                let level = decision.level.unwrap_or(pending.level);
                if let Err(e) = self
                    .permissions
                    .upsert(&pending.origin, level, condition)
                    .await
                {
                    warn!(
                        consent_id = %decision.id,
                        origin = %pending.origin,
                        error = %e,
                        "Failed to store permission, granting this request only"
                    );
                }
            }
        }

        let origin = pending.origin.clone();
        let (delivered, handle) = pending.resolve(outcome);
        if !delivered {
            debug!(consent_id = %decision.id, "Requester went away before the decision");
        }
        if let Some(handle) = handle {
            self.surface.close(&handle);
        }

        info!(consent_id = %decision.id, origin = %origin, outcome = ?outcome, "Consent resolved");
    }

    /// Run an authorized operation against the secret.
    async fn execute(&self, operation: OperationType, params: Value) -> Result<Value> {
        let secret = self
            .keys
            .read_private_key()
            .await?
            .ok_or(BrokerError::MissingKey)?;

        match operation {
            OperationType::GetPublicKey => self.get_public_key(&secret),
            OperationType::GetRelays => self.get_relays().await,
            OperationType::SignEvent => self.sign_event(&secret, params),
            OperationType::Nip04Encrypt => self.nip04_encrypt(&secret, params),
            OperationType::Nip04Decrypt => self.nip04_decrypt(&secret, params),
        }
    }

    fn get_public_key(&self, secret: &SecretKey) -> Result<Value> {
        Ok(Value::String(get_public_key(secret)?))
    }

    async fn get_relays(&self) -> Result<Value> {
        let relays = self.keys.read_relays().await?.unwrap_or_default();
        serde_json::to_value(relays)
            .map_err(|e| BrokerError::Internal(format!("failed to encode relays: {e}")))
    }

    fn sign_event(&self, secret: &SecretKey, params: Value) -> Result<Value> {
        let SignEventParams { event } = parse_params(OperationType::SignEvent, params)
            .map_err(|_| BrokerError::InvalidEvent)?;
        let event = Event::from_value(event.ok_or(BrokerError::InvalidEvent)?)?;
        let signed = finalize_event(event, secret)?;
        serde_json::to_value(signed)
            .map_err(|e| BrokerError::Internal(format!("failed to encode event: {e}")))
    }

    fn nip04_encrypt(&self, secret: &SecretKey, params: Value) -> Result<Value> {
        let EncryptParams { peer, plaintext } = parse_params(OperationType::Nip04Encrypt, params)?;
        Ok(Value::String(nip04::encrypt(secret, &peer, &plaintext)?))
    }

    fn nip04_decrypt(&self, secret: &SecretKey, params: Value) -> Result<Value> {
        let DecryptParams { peer, ciphertext } = parse_params(OperationType::Nip04Decrypt, params)?;
        Ok(Value::String(nip04::decrypt(secret, &peer, &ciphertext)?))
    }
}
