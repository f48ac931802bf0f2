//! Cryptographic operations on the custodial key.
//!
//! # Algorithms
//!
//! - **Public key**: BIP-340 x-only secp256k1 key
//! - **Event id**: SHA-256 over the canonical event array
//! - **Signing**: BIP-340 Schnorr over the event id
//! - **Encryption**: NIP-04 (ECDH + AES-256-CBC)
//!
//! Everything here is a pure function of its inputs. The broker borrows the
//! secret for the duration of a single call.

pub mod event;
pub mod keys;
pub mod nip04;

pub use event::{
    finalize_event, get_event_hash, sign_event, validate_event, verify_event, Event,
};
pub use keys::{get_public_key, SecretKey, SECRET_KEY_LEN};
