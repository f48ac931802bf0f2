//! Event hashing, validation and signing.
//!
//! An event id is the hex SHA-256 of the canonical array
//! `[0, pubkey, created_at, kind, tags, content]`. The signature is a
//! BIP-340 Schnorr signature over the 32 id bytes.

use k256::schnorr::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use signature::hazmat::PrehashVerifier;

use super::keys::{get_public_key, SecretKey};
use crate::types::{BrokerError, Result};

/// A signable event as handed over by a caller.
///
/// Fields the broker does not know about are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,

    pub created_at: u64,

    pub kind: u32,

    pub tags: Vec<Vec<String>>,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Parse an untrusted JSON value. Anything that does not have the shape
    /// of an event is reported as [`BrokerError::InvalidEvent`].
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|_| BrokerError::InvalidEvent)
    }
}

fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Compute the event id. Requires `pubkey` to be set.
pub fn get_event_hash(event: &Event) -> Result<String> {
    let pubkey = event.pubkey.as_deref().ok_or(BrokerError::InvalidEvent)?;
    let canonical = json!([
        0,
        pubkey,
        event.created_at,
        event.kind,
        event.tags,
        event.content
    ]);
    let serialized = serde_json::to_string(&canonical)
        .map_err(|e| BrokerError::Internal(format!("event serialization failed: {e}")))?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// Structural validation performed before signing.
pub fn validate_event(event: &Event) -> bool {
    let pubkey_ok = event
        .pubkey
        .as_deref()
        .is_some_and(|pk| is_hex_of_len(pk, 64));
    let id_ok = event.id.as_deref().map_or(true, |id| is_hex_of_len(id, 64));
    pubkey_ok && id_ok
}

/// Sign the event's hash with `secret`, returning the hex signature.
///
/// The digest is always recomputed from the event body, never taken from
/// `id`.
pub fn sign_event(event: &Event, secret: &SecretKey) -> Result<String> {
    let mut digest = [0u8; 32];
    hex::decode_to_slice(get_event_hash(event)?, &mut digest)
        .map_err(|_| BrokerError::InvalidEvent)?;

    let aux_rand: [u8; 32] = rand::random();
    let signature = secret
        .signing_key()?
        .sign_prehash_with_aux_rand(&digest, &aux_rand)?;
    Ok(hex::encode(signature.to_bytes()))
}

/// Fill in missing `pubkey` and `id`, validate, then attach a signature.
///
/// A supplied `id` that does not match the event's hash is rejected.
pub fn finalize_event(mut event: Event, secret: &SecretKey) -> Result<Event> {
    if event.pubkey.as_deref().map_or(true, str::is_empty) {
        event.pubkey = Some(get_public_key(secret)?);
    }

    let hash = get_event_hash(&event)?;
    match event.id.as_deref() {
        Some(id) if !id.is_empty() && id != hash => return Err(BrokerError::InvalidEvent),
        _ => event.id = Some(hash),
    }

    if !validate_event(&event) {
        return Err(BrokerError::InvalidEvent);
    }

    event.sig = Some(sign_event(&event, secret)?);
    Ok(event)
}

/// Check that the id matches the content and the signature matches the id.
pub fn verify_event(event: &Event) -> bool {
    let (Some(id), Some(pubkey), Some(sig)) = (
        event.id.as_deref(),
        event.pubkey.as_deref(),
        event.sig.as_deref(),
    ) else {
        return false;
    };

    if !validate_event(event) || get_event_hash(event).ok().as_deref() != Some(id) {
        return false;
    }

    let (Ok(digest), Ok(pubkey), Ok(sig)) = (hex::decode(id), hex::decode(pubkey), hex::decode(sig))
    else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(sig.as_slice()) else {
        return false;
    };
    verifying_key.verify_prehash(&digest, &signature).is_ok()
}
