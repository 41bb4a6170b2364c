//! Symmetric secret encryption for keys and tokens at rest.
//!
//! AES-256-GCM with the key derived from an operator-supplied secret via
//! SHA-256. The wire format is base64(nonce || ciphertext); the nonce is
//! random per encryption.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{KeyError, Result};

const NONCE_LEN: usize = 12;

pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Derive the AES key from an arbitrary secret string.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Random ephemeral key. Anything encrypted with it is unreadable
    /// after restart.
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| KeyError::Crypto(e.to_string()))?;
        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let payload = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyError::Crypto(e.to_string()))?;
        if payload.len() <= NONCE_LEN {
            return Err(KeyError::Crypto("payload too short".to_string()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| KeyError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = SecretCipher::from_secret("hunter2");
        let encoded = cipher.encrypt(b"sk-or-v1-abcdef").unwrap();
        let decoded = cipher.decrypt(&encoded).unwrap();
        assert_eq!(decoded, b"sk-or-v1-abcdef");
    }

    #[test]
    fn same_secret_derives_compatible_cipher() {
        let a = SecretCipher::from_secret("shared");
        let b = SecretCipher::from_secret("shared");
        let encoded = a.encrypt(b"payload").unwrap();
        assert_eq!(b.decrypt(&encoded).unwrap(), b"payload");
    }

    #[test]
    fn wrong_secret_fails_to_decrypt() {
        let a = SecretCipher::from_secret("right");
        let b = SecretCipher::from_secret("wrong");
        let encoded = a.encrypt(b"payload").unwrap();
        assert!(b.decrypt(&encoded).is_err());
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = SecretCipher::from_secret("s");
        let one = cipher.encrypt(b"x").unwrap();
        let two = cipher.encrypt(b"x").unwrap();
        assert_ne!(one, two);
    }
}
