//! The custodial secret and public-key derivation.
//!
//! The secret is a 32-byte secp256k1 scalar. Its public counterpart is the
//! BIP-340 x-only key, rendered as 64 lowercase hex characters.

use std::fmt;

use k256::schnorr::SigningKey;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{BrokerError, Result};

/// secp256k1 secret key length (32 bytes)
pub const SECRET_KEY_LEN: usize = 32;

/// The custodial private key.
///
/// Key material is zeroized when dropped and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; SECRET_KEY_LEN],
}

impl SecretKey {
    /// Parse a hex-encoded secret, rejecting values outside the curve order.
    pub fn from_hex(input: &str) -> Result<Self> {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        hex::decode_to_slice(input.trim(), &mut bytes)
            .map_err(|e| BrokerError::InvalidParams(format!("invalid secret key: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Wrap raw scalar bytes, rejecting zero and values outside the curve order.
    pub fn from_bytes(mut bytes: [u8; SECRET_KEY_LEN]) -> Result<Self> {
        if let Err(e) = SigningKey::from_bytes(&bytes) {
            bytes.zeroize();
            return Err(BrokerError::InvalidParams(format!("invalid secret key: {e}")));
        }
        Ok(Self { bytes })
    }

    /// Generate a new random secret using the OS RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let mut bytes = [0u8; SECRET_KEY_LEN];
        bytes.copy_from_slice(&signing_key.to_bytes());
        Self { bytes }
    }

    /// Hex encoding, for writing back to the key store.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub(crate) fn signing_key(&self) -> Result<SigningKey> {
        Ok(SigningKey::from_bytes(&self.bytes)?)
    }

    pub(crate) fn ecdh_key(&self) -> Result<k256::SecretKey> {
        Ok(k256::SecretKey::from_slice(&self.bytes)?)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Derive the x-only public key (hex) for `secret`.
pub fn get_public_key(secret: &SecretKey) -> Result<String> {
    let signing_key = secret.signing_key()?;
    Ok(hex::encode(signing_key.verifying_key().to_bytes()))
}
