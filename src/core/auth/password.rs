//! Password hashing and verification
//!
//! Thin wrapper over bcrypt. Verification of a well-formed hash never errors;
//! a malformed stored hash is reported as [`PasswordError::MalformedHash`] and
//! treated by callers as an internal failure, not a credential mismatch.

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// bcrypt only looks at the first 72 bytes of input
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Salt for the throwaway hash computed when there is no account to check
const PLACEHOLDER_SALT: [u8; 16] = *b"gatehouse-no-acc";

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    HashingError(String),

    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Hashes new passwords and checks submitted ones against stored hashes
#[derive(Debug, Clone, Copy)]
pub struct CredentialVerifier {
    cost: u32,
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl CredentialVerifier {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt with automatic salt generation
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        bcrypt::hash(password, self.cost).map_err(|e| PasswordError::HashingError(e.to_string()))
    }

    /// Verify a password against a bcrypt hash
    pub fn verify(&self, stored_hash: &str, password: &str) -> Result<bool, PasswordError> {
        bcrypt::verify(password, stored_hash)
            .map_err(|e| PasswordError::MalformedHash(e.to_string()))
    }

    /// Reject a password for an account that does not exist.
    ///
    /// Runs the same bcrypt work as [`verify`](Self::verify) at this
    /// verifier's cost, so an unknown email takes as long as a wrong password.
    pub fn verify_missing(&self, password: &str) -> bool {
        if let Err(e) = bcrypt::hash_with_salt(password, self.cost, PLACEHOLDER_SALT) {
            tracing::warn!(error = %e, "Placeholder password hash failed");
        }
        false
    }
}
