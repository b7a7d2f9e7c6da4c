//! Credential validation with password hashing support.

use std::collections::HashMap;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use portcall_broker::auth::CredentialValidator;

/// Credential validator that supports argon2 password hashes.
///
/// The password file stores entries as `username:hash` where hash is an
/// argon2id PHC string. Plaintext passwords (without `$` prefix) are also
/// supported for backwards compatibility.
pub struct HashedCredentialValidator {
    /// Map of username -> password hash (or plaintext).
    credentials: HashMap<String, String>,
}

impl HashedCredentialValidator {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }
}

impl CredentialValidator for HashedCredentialValidator {
    fn validate(&self, username: &str, password: &[u8]) -> bool {
        let Some(stored) = self.credentials.get(username) else {
            return false;
        };

        if stored.starts_with('$') {
            // Argon2 hashed password
            let Ok(parsed_hash) = PasswordHash::new(stored) else {
                return false;
            };
            Argon2::default()
                .verify_password(password, &parsed_hash)
                .is_ok()
        } else {
            // Plaintext fallback for backwards compatibility
            let password_str = match std::str::from_utf8(password) {
                Ok(s) => s,
                Err(_) => return false,
            };
            stored == password_str
        }
    }
}
