//! NIP-04 encrypted direct messages.
//!
//! The shared key is the x-coordinate of the ECDH point between our secret
//! and the peer's x-only public key (lifted to even y). Messages are
//! AES-256-CBC with PKCS#7 padding and a random IV, encoded as
//! `base64(ciphertext) + "?iv=" + base64(iv)`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use super::keys::SecretKey;
use crate::types::{BrokerError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-CBC IV length (16 bytes)
pub const IV_LEN: usize = 16;

const IV_SEPARATOR: &str = "?iv=";

fn shared_key(secret: &SecretKey, peer: &str) -> Result<Zeroizing<[u8; 32]>> {
    let peer_bytes = hex::decode(peer.trim())?;
    if peer_bytes.len() != 32 {
        return Err(BrokerError::InvalidParams(format!(
            "peer public key must be 32 bytes, got {}",
            peer_bytes.len()
        )));
    }

    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(&peer_bytes);
    let peer_key = k256::PublicKey::from_sec1_bytes(&sec1)?;

    let our_key = secret.ecdh_key()?;
    let shared = k256::ecdh::diffie_hellman(our_key.to_nonzero_scalar(), peer_key.as_affine());

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(shared.raw_secret_bytes());
    Ok(key)
}

/// Encrypt `plaintext` for `peer` (hex x-only public key).
pub fn encrypt(secret: &SecretKey, peer: &str, plaintext: &str) -> Result<String> {
    let key = shared_key(secret, peer)?;
    let iv: [u8; IV_LEN] = rand::random();

    let cipher = Aes256CbcEnc::new_from_slices(key.as_slice(), &iv)
        .map_err(|e| BrokerError::Crypto(format!("cipher init failed: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!(
        "{}{}{}",
        BASE64.encode(ciphertext),
        IV_SEPARATOR,
        BASE64.encode(iv)
    ))
}

/// Decrypt a NIP-04 payload received from `peer`.
pub fn decrypt(secret: &SecretKey, peer: &str, payload: &str) -> Result<String> {
    let (ciphertext_b64, iv_b64) = payload.split_once(IV_SEPARATOR).ok_or_else(|| {
        BrokerError::InvalidParams("ciphertext is missing the ?iv= suffix".into())
    })?;

    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| BrokerError::InvalidParams(format!("invalid ciphertext encoding: {e}")))?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|e| BrokerError::InvalidParams(format!("invalid iv encoding: {e}")))?;
    if iv.len() != IV_LEN {
        return Err(BrokerError::InvalidParams(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            iv.len()
        )));
    }

    let key = shared_key(secret, peer)?;
    let cipher = Aes256CbcDec::new_from_slices(key.as_slice(), &iv)
        .map_err(|e| BrokerError::Crypto(format!("cipher init failed: {e}")))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| BrokerError::Crypto("decryption failed (bad padding or wrong key)".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| BrokerError::Crypto("decrypted message is not valid UTF-8".into()))
}
