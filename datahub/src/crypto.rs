//! Item encryption.
//!
//! Items are encrypted with AES-256-GCM. The key is the SHA-256 digest of the
//! configured password, and the envelope is `base64(nonce || ciphertext)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

use crate::error::{DatahubError, Result};

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts channel items with a shared password.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String>;
}

/// Default cipher: AES-256-GCM keyed by `sha256(password)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

fn cipher_for(password: &str) -> Result<Aes256Gcm> {
    let key = Sha256::digest(password.as_bytes());
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| DatahubError::Crypto(format!("Failed to create cipher: {}", e)))
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String> {
        let cipher = cipher_for(password)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| DatahubError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut envelope = nonce_bytes.to_vec();
        envelope.extend_from_slice(&ciphertext);

        Ok(general_purpose::STANDARD.encode(envelope))
    }

    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String> {
        let cipher = cipher_for(password)?;

        let envelope = general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| DatahubError::Crypto(format!("Failed to decode encrypted item: {}", e)))?;

        if envelope.len() < NONCE_LEN {
            return Err(DatahubError::Crypto("Encrypted item too short".to_string()));
        }

        let (nonce_bytes, sealed) = envelope.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|e| DatahubError::Crypto(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| DatahubError::Crypto(format!("Decrypted item is not UTF-8: {}", e)))
    }
}
