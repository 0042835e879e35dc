//! Credential Store
//!
//! Argon2 password hashing. Hashes are PHC strings so parameters travel
//! with the hash.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;

/// Credential errors.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// Could not gather salt entropy.
    #[error("salt generation failed: {0}")]
    Salt(String),
    /// Hashing failed.
    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Hashes and verifies passwords.
pub trait CredentialStore: Send + Sync {
    /// Produce a storable hash for `password`.
    fn hash(&self, password: &str) -> Result<String, CredentialError>;

    /// Check `password` against a stored hash.
    fn verify(&self, hash: &str, password: &str) -> bool;
}

/// Argon2id with default parameters.
#[derive(Debug, Clone, Default)]
pub struct Argon2Credentials;

impl CredentialStore for Argon2Credentials {
    fn hash(&self, password: &str) -> Result<String, CredentialError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| CredentialError::Salt(e.to_string()))?;
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| CredentialError::Salt(e.to_string()))?;
        let phc = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::Hash(e.to_string()))?
            .to_string();
        Ok(phc)
    }

    fn verify(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let store = Argon2Credentials;
        let hash = store.hash("hunter2").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(store.verify(&hash, "hunter2"));
        assert!(!store.verify(&hash, "hunter3"));
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        let store = Argon2Credentials;
        assert!(!store.verify("not-a-phc-string", "anything"));
        assert!(!store.verify("", ""));
    }
}
