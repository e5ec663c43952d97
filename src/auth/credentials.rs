//! Credential backends.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecutionError, SimError, SimResult};

/// Identifier of an authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an existing account id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication provider: verifies email/password pairs.
///
/// Roles are not its concern; they live in the users collection.
pub trait CredentialBackend: Send + Sync {
    /// Creates an account.
    ///
    /// # Errors
    /// - `AuthenticationFailed`: if the email is already registered
    fn sign_up(&self, email: &str, password: &str) -> SimResult<UserId>;

    /// Verifies a password and returns the account id.
    ///
    /// # Errors
    /// - `AuthenticationFailed`: unknown email or wrong password
    fn sign_in(&self, email: &str, password: &str) -> SimResult<UserId>;
}

struct Account {
    uid: UserId,
    salt: [u8; 16],
    digest: blake3::Hash,
}

fn password_digest(salt: &[u8; 16], password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn auth_failed(reason: &str) -> SimError {
    ExecutionError::AuthenticationFailed {
        reason: reason.to_string(),
    }
    .into()
}

/// In-memory accounts with salted blake3 password digests.
#[derive(Default)]
pub struct InMemoryCredentials {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryCredentials {
    /// Create a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.accounts.read().map_or(0, |a| a.len());
        f.debug_struct("InMemoryCredentials")
            .field("accounts", &count)
            .finish()
    }
}

impl CredentialBackend for InMemoryCredentials {
    fn sign_up(&self, email: &str, password: &str) -> SimResult<UserId> {
        let key = normalize_email(email);
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| SimError::internal("poisoned lock: credentials.sign_up"))?;
        if accounts.contains_key(&key) {
            return Err(auth_failed("email already in use"));
        }

        let salt = Uuid::new_v4().into_bytes();
        let uid = UserId::new(Uuid::new_v4().simple().to_string());
        accounts.insert(
            key,
            Account {
                uid: uid.clone(),
                salt,
                digest: password_digest(&salt, password),
            },
        );
        Ok(uid)
    }

    fn sign_in(&self, email: &str, password: &str) -> SimResult<UserId> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| SimError::internal("poisoned lock: credentials.sign_in"))?;
        let Some(account) = accounts.get(&normalize_email(email)) else {
            return Err(auth_failed("invalid credentials"));
        };
        // blake3::Hash equality is constant-time.
        if password_digest(&account.salt, password) != account.digest {
            return Err(auth_failed("invalid credentials"));
        }
        Ok(account.uid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_then_sign_in() {
        let creds = InMemoryCredentials::new();
        let uid = creds.sign_up("Nurse@Example.org", "hunter22").unwrap();
        assert_eq!(creds.sign_in("nurse@example.org ", "hunter22").unwrap(), uid);
    }

    #[test]
    fn test_wrong_password_and_unknown_email() {
        let creds = InMemoryCredentials::new();
        creds.sign_up("a@b.co", "secret1").unwrap();
        assert!(creds.sign_in("a@b.co", "secret2").is_err());
        assert!(creds.sign_in("x@b.co", "secret1").is_err());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let creds = InMemoryCredentials::new();
        creds.sign_up("a@b.co", "secret1").unwrap();
        let err = creds.sign_up("A@B.CO", "other12").unwrap_err();
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_same_password_different_digests() {
        let creds = InMemoryCredentials::new();
        creds.sign_up("a@b.co", "same-pass").unwrap();
        creds.sign_up("c@d.co", "same-pass").unwrap();
        let accounts = creds.accounts.read().unwrap();
        assert_ne!(accounts["a@b.co"].digest, accounts["c@d.co"].digest);
    }
}
