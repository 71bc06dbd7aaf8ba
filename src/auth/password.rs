//! Password hashing via bcrypt.

use crate::error::GatewayError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, GatewayError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| GatewayError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!("Password verification error: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("secret1").unwrap();
        assert_ne!(hash, "secret1");
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        assert!(!verify_password("secret1", "not-a-bcrypt-hash"));
    }
}
