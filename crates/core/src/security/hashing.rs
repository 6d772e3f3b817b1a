use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};
use crate::{config::SecurityConfig, error::Result, Error};

/// Salted Argon2id password hashing (invariant I7: a PBKDF2-equivalent
/// hash with >=100k effective iterations and a per-record random salt).
/// Verification is constant-time via `argon2::PasswordVerifier`.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| Error::internal(format!("invalid argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::internal(format!("failed to hash password: {e}")))?;
        Ok(hash.to_string())
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::internal(format!("invalid password hash format: {e}")))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::internal(format!("password verification error: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            aes_encryption_key: "01234567890123456789012345678901".to_string(),
        }
    }

    #[test]
    fn hash_differs_from_plaintext_and_verifies() {
        let hasher = PasswordHasher::new(&test_config()).unwrap();
        let hash = hasher.hash_password("Pa55!").unwrap();

        assert_ne!(hash, "Pa55!");
        assert!(hasher.verify_password("Pa55!", &hash).unwrap());
        assert!(!hasher.verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn same_password_hashes_differently_per_salt() {
        let hasher = PasswordHasher::new(&test_config()).unwrap();
        let h1 = hasher.hash_password("Pa55!").unwrap();
        let h2 = hasher.hash_password("Pa55!").unwrap();
        assert_ne!(h1, h2);
    }
}
