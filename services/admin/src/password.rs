//! Password hashing with Argon2id
//!
//! Stored credentials are PHC strings. While `PASSWORD_MIGRATION` is on, a
//! stored value that is not a PHC string is compared as legacy plaintext; a
//! match is reported as [`PasswordCheck::ValidLegacy`] so the caller re-hashes
//! and overwrites it at once.

use argon2::{
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier, password_hash::SaltString,
};
use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("password hashing failed: {0}")]
pub struct HashingError(String);

/// Outcome of checking a login attempt against the stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Valid,
    /// Matched a plaintext record; must be re-hashed immediately
    ValidLegacy,
    Invalid,
}

#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    legacy_plaintext: bool,
}

impl PasswordHasher {
    pub fn new(legacy_plaintext: bool) -> Self {
        Self {
            argon2: Argon2::default(),
            legacy_plaintext,
        }
    }

    pub fn legacy_plaintext(&self) -> bool {
        self.legacy_plaintext
    }

    /// Hash `plaintext` with a fresh random salt
    pub fn hash(&self, plaintext: &str) -> Result<String, HashingError> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashingError(e.to_string()))
    }

    /// Verify `plaintext` against a PHC digest. Unparseable digests never match.
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        match PasswordHash::new(digest) {
            Ok(parsed) => self
                .argon2
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Spend one verification on a login for an unknown account so it takes
    /// as long as a wrong password for a real one. Always `Invalid`.
    pub fn check_missing(&self, plaintext: &str) -> PasswordCheck {
        if let Some(digest) = self.placeholder_digest() {
            self.verify(plaintext, digest);
        }
        PasswordCheck::Invalid
    }

    fn placeholder_digest(&self) -> Option<&'static str> {
        static DIGEST: OnceLock<Option<String>> = OnceLock::new();
        DIGEST
            .get_or_init(|| self.hash("placeholder credential").ok())
            .as_deref()
    }

    pub fn check(&self, plaintext: &str, stored: &str) -> PasswordCheck {
        if is_hashed(stored) {
            if self.verify(plaintext, stored) {
                PasswordCheck::Valid
            } else {
                PasswordCheck::Invalid
            }
        } else if self.legacy_plaintext
            && bool::from(plaintext.as_bytes().ct_eq(stored.as_bytes()))
        {
            PasswordCheck::ValidLegacy
        } else {
            PasswordCheck::Invalid
        }
    }
}

/// Whether `stored` is a PHC hash string rather than a legacy plaintext value
pub fn is_hashed(stored: &str) -> bool {
    PasswordHash::new(stored).is_ok()
}
