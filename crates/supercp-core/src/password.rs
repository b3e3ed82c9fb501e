//! Secrets handling: plaintext wrappers, bcrypt hashes, generated passwords

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Length of passwords generated when the caller supplies none
pub const GENERATED_PASSWORD_LEN: usize = 16;

/// A plaintext secret that never shows up in `Debug` output
///
/// Serializes to the bare string so it can travel to the agent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a plaintext value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Plaintext value, for the agent call that needs it
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Stored password hash in bcrypt modular-crypt form (`$2b$<cost>$...`)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Wrap a hash read back from storage
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Encoded form, as written to storage and protocol tables
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a plaintext candidate against this hash
    ///
    /// A malformed stored hash never verifies.
    pub fn verify(&self, candidate: &Secret) -> bool {
        bcrypt::verify(candidate.expose(), &self.0).unwrap_or(false)
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

/// Hash a plaintext password with bcrypt at the default cost
pub fn hash_password(password: &Secret) -> Result<PasswordHash> {
    let hashed = bcrypt::hash(password.expose(), bcrypt::DEFAULT_COST)?;
    Ok(PasswordHash(hashed))
}

/// Generate a random alphanumeric password
pub fn generate_password(len: usize) -> Secret {
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Secret(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_and_is_salted() {
        let secret = Secret::from("correct horse");
        let a = hash_password(&secret).unwrap();
        let b = hash_password(&secret).unwrap();

        assert_ne!(a, b);
        assert!(a.verify(&secret));
        assert!(!a.verify(&Secret::from("wrong")));
        assert!(a.as_str().starts_with("$2b$12$"));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        let hash = PasswordHash::from_stored("sha256$aa$bb");
        assert!(!hash.verify(&Secret::from("anything")));
    }

    #[test]
    fn generated_password_shape() {
        let pw = generate_password(GENERATED_PASSWORD_LEN);
        assert_eq!(pw.expose().len(), 16);
        assert!(pw.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn debug_never_prints_secrets() {
        let secret = Secret::from("hunter2");
        let hash = hash_password(&secret).unwrap();
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert!(!format!("{:?}", hash).contains(hash.as_str()));
    }
}
