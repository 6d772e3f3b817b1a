use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use crate::{config::SecurityConfig, error::Result, Error};

/// AES-256-GCM encryption for opaque data at rest — tenant connection
/// parameters stored by the tenant registry are the only thing this core
/// currently encrypts, since they are otherwise plain secrets sitting in
/// the central metadata store.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let key_bytes = config.aes_encryption_key.as_bytes();
        if key_bytes.len() != 32 {
            return Err(Error::internal("AES key must be exactly 32 bytes"));
        }

        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::internal(format!("encryption failed: {e}")))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 12 {
            return Err(Error::internal("ciphertext too short to contain a nonce"));
        }
        let (nonce_bytes, encrypted_data) = ciphertext.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, encrypted_data)
            .map_err(|e| Error::internal(format!("decryption failed: {e}")))
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    pub fn decrypt_string(&self, ciphertext: &str) -> Result<String> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let decoded = STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::internal(format!("invalid base64: {e}")))?;
        let decrypted = self.decrypt(&decoded)?;
        String::from_utf8(decrypted).map_err(|e| Error::internal(format!("invalid utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            aes_encryption_key: "01234567890123456789012345678901".to_string(),
        }
    }

    #[test]
    fn round_trips_string() {
        let svc = EncryptionService::new(&test_config()).unwrap();
        let encrypted = svc.encrypt_string("tenant-connection-secret").unwrap();
        assert_ne!(encrypted, "tenant-connection-secret");
        assert_eq!(svc.decrypt_string(&encrypted).unwrap(), "tenant-connection-secret");
    }
}
