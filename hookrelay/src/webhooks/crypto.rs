//! Secret encryption: AES-256-GCM for subscription secrets embedded in
//! outbox payloads.
//!
//! The outbox captures a subscription snapshot at publish time, including
//! the signing secret. Storing that secret in plaintext would leak it to
//! anything with read access to the outbox, so it is sealed here and opened
//! only inside the delivery handler. Wire format:
//! `base64(nonce || ciphertext || tag)` with a random 96-bit nonce per call.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use super::error::WebhookError;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, WebhookError> {
    if key.len() != KEY_LEN {
        return Err(WebhookError::Crypto(format!(
            "encryption key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|err| WebhookError::Crypto(err.to_string()))
}

/// Seal a plaintext secret for storage inside an outbox payload.
///
/// Each call draws a fresh nonce from the OS CSPRNG, so encrypting the same
/// secret twice yields different ciphertexts.
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|err| WebhookError::Crypto(err.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

/// Open a secret sealed by [`encrypt_secret`].
///
/// Fails on a wrong key, a truncated value, or any tampering with the
/// ciphertext (GCM authenticates).
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher_for(key)?;

    let sealed = BASE64
        .decode(encoded)
        .map_err(|err| WebhookError::Crypto(format!("base64 decode failed: {err}")))?;
    if sealed.len() <= NONCE_LEN {
        return Err(WebhookError::Crypto("sealed secret too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|err| WebhookError::Crypto(err.to_string()))?;

    String::from_utf8(plaintext).map_err(|err| WebhookError::Crypto(err.to_string()))
}
