//! Secret vault (C2): AES-128-GCM with a PBKDF2-HMAC-SHA256 derived key.
//!
//! Wire format is `base64(nonce(12) || tag(16) || ciphertext)` — tag precedes
//! ciphertext, matching the deployed original's layout so re-encrypting an
//! existing user's session doesn't orphan it.

use crate::domain::BotError;
use crate::ports::outbound::VaultPort;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct AesGcmVault {
    key: [u8; KEY_LEN],
}

impl AesGcmVault {
    /// Derives the AES key once at startup from `MASTER_KEY` (password) and
    /// `IV_KEY` (salt). Both must be non-empty; callers should treat a
    /// missing value as a fatal startup configuration error.
    pub fn new(master_key: &str, iv_key: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(
            master_key.as_bytes(),
            iv_key.as_bytes(),
            PBKDF2_ITERATIONS,
            &mut key,
        );
        Self { key }
    }
}

impl VaultPort for AesGcmVault {
    fn encrypt(&self, plaintext: &str) -> Result<String, BotError> {
        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the end of the ciphertext; the wire
        // format here wants it between the nonce and the ciphertext.
        let ct_with_tag = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| BotError::Other("encryption failure".into()))?;
        let split_at = ct_with_tag.len() - TAG_LEN;
        let (ct, tag) = ct_with_tag.split_at(split_at);

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag);
        out.extend_from_slice(ct);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, token: &str) -> Result<String, BotError> {
        let raw = STANDARD
            .decode(token)
            .map_err(|_| BotError::InvalidCiphertext)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(BotError::InvalidCiphertext);
        }
        let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
        let (tag, ct) = rest.split_at(TAG_LEN);

        let mut ct_with_tag = Vec::with_capacity(ct.len() + TAG_LEN);
        ct_with_tag.extend_from_slice(ct);
        ct_with_tag.extend_from_slice(tag);

        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ct_with_tag.as_ref())
            .map_err(|_| BotError::InvalidCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| BotError::InvalidCiphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let vault = AesGcmVault::new("master-secret", "some-iv-salt");
        let token = vault.encrypt("1BVtsOK4Bu7...session-string...").unwrap();
        let back = vault.decrypt(&token).unwrap();
        assert_eq!(back, "1BVtsOK4Bu7...session-string...");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let vault = AesGcmVault::new("master-secret", "some-iv-salt");
        let token = vault.encrypt("payload").unwrap();
        let mut raw = STANDARD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = STANDARD.encode(raw);
        assert!(vault.decrypt(&tampered).is_err());
    }

    #[test]
    fn distinct_calls_use_distinct_nonces() {
        let vault = AesGcmVault::new("master-secret", "some-iv-salt");
        let a = vault.encrypt("same plaintext").unwrap();
        let b = vault.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
    }
}
