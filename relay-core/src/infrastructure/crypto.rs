// relay-core/src/infrastructure/crypto.rs
//
// AEAD cipher for connection credentials at rest. AES-256-GCM with a
// random 96-bit nonce per encryption; the wire format is
// base64(nonce || ciphertext || tag). The key comes from ENCRYPTION_KEY
// (base64 of 32 bytes) and is validated lazily at first use.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use crate::infrastructure::error::InfrastructureError;

const NONCE_LEN: usize = 12;

pub struct CredentialCipher {
    key: Option<String>,
}

impl CredentialCipher {
    pub fn new(key: Option<String>) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm, InfrastructureError> {
        let encoded = self.key.as_deref().ok_or_else(|| {
            InfrastructureError::Encryption(
                "ENCRYPTION_KEY not set. Generate one with: openssl rand -base64 32".to_string(),
            )
        })?;
        let bytes = BASE64.decode(encoded).map_err(|_| {
            InfrastructureError::Encryption(
                "ENCRYPTION_KEY is invalid. Must be base64-encoded bytes.".to_string(),
            )
        })?;
        if bytes.len() != 32 {
            return Err(InfrastructureError::Encryption(format!(
                "ENCRYPTION_KEY must decode to 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)))
    }

    /// Encrypt a plaintext string. Each call produces a distinct
    /// ciphertext thanks to the random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, InfrastructureError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| InfrastructureError::Encryption("Encryption failed".to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(BASE64.encode(envelope))
    }

    /// Decrypt a ciphertext produced by [`encrypt`]. Forged or corrupted
    /// ciphertexts fail authentication.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, InfrastructureError> {
        let cipher = self.cipher()?;
        let envelope = BASE64.decode(ciphertext).map_err(|_| {
            InfrastructureError::Encryption("Ciphertext is not valid base64".to_string())
        })?;
        if envelope.len() <= NONCE_LEN {
            return Err(InfrastructureError::Encryption(
                "Ciphertext too short".to_string(),
            ));
        }
        let (nonce, sealed) = envelope.split_at(NONCE_LEN);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| {
                InfrastructureError::Encryption(
                    "Decryption failed. The encryption key may have changed or data is corrupted."
                        .to_string(),
                )
            })?;
        String::from_utf8(plain).map_err(|_| {
            InfrastructureError::Encryption("Decrypted payload is not UTF-8".to_string())
        })
    }

    /// Serialize a credential map to canonical JSON (BTreeMap keeps key
    /// order stable) and encrypt it.
    pub fn encrypt_map(
        &self,
        credentials: &BTreeMap<String, Value>,
    ) -> Result<String, InfrastructureError> {
        let json = serde_json::to_string(credentials)?;
        self.encrypt(&json)
    }

    pub fn decrypt_map(
        &self,
        ciphertext: &str,
    ) -> Result<BTreeMap<String, Value>, InfrastructureError> {
        let json = self.decrypt(ciphertext)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        // 32 zero bytes, base64-encoded
        CredentialCipher::new(Some(BASE64.encode([0u8; 32])))
    }

    #[test]
    fn test_round_trip() -> anyhow::Result<()> {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("s3cret-value")?;
        assert_eq!(cipher.decrypt(&sealed)?, "s3cret-value");
        Ok(())
    }

    #[test]
    fn test_distinct_ciphertexts_for_same_input() -> anyhow::Result<()> {
        let cipher = test_cipher();
        let a = cipher.encrypt("same")?;
        let b = cipher.encrypt("same")?;
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a)?, cipher.decrypt(&b)?);
        Ok(())
    }

    #[test]
    fn test_forged_ciphertext_rejected() -> anyhow::Result<()> {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("payload")?;
        let mut raw = BASE64.decode(&sealed)?;
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let forged = BASE64.encode(raw);
        assert!(cipher.decrypt(&forged).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_key_fails_with_clear_error() {
        let cipher = CredentialCipher::new(None);
        let err = cipher.encrypt("x").unwrap_err();
        assert!(err.to_string().contains("ENCRYPTION_KEY"));
    }

    #[test]
    fn test_map_round_trip() -> anyhow::Result<()> {
        let cipher = test_cipher();
        let mut creds = BTreeMap::new();
        creds.insert("username".to_string(), Value::String("svc".into()));
        creds.insert("port".to_string(), Value::from(5432));
        let sealed = cipher.encrypt_map(&creds)?;
        assert_eq!(cipher.decrypt_map(&sealed)?, creds);
        Ok(())
    }
}
