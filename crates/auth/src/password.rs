//! Password hashing (argon2id, PHC string format).
//!
//! Digests embed their own salt and parameters, so verification keeps working
//! after the configured cost changes. Async callers use the `_blocking`
//! variants, which move the work onto tokio's blocking pool.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use omms_core::DomainError;

/// An irreversible password digest.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    /// Wrap a digest loaded from storage.
    pub fn from_stored(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordDigest([REDACTED])")
    }
}

/// Slow adaptive hasher with a tunable cost.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// Default memory cost with the given number of iterations.
    pub fn new(iterations: u32) -> Result<Self, DomainError> {
        Self::with_cost(Params::DEFAULT_M_COST, iterations)
    }

    /// Explicit memory (KiB) and time cost.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self, DomainError> {
        let params = Params::new(memory_kib, iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| DomainError::validation(format!("invalid password hash cost: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plaintext: &str) -> Result<PasswordDigest, DomainError> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(hashing_failed)?;
        Ok(PasswordDigest(digest.to_string()))
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_blocking(&self, plaintext: String) -> Result<PasswordDigest, DomainError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| DomainError::internal(format!("password hashing task failed: {e}")))?
    }

    /// One-way comparison. A digest that cannot be parsed never matches.
    pub fn verify(&self, plaintext: &str, digest: &PasswordDigest) -> bool {
        let Ok(parsed) = PasswordHash::new(digest.as_str()) else {
            tracing::warn!("stored password digest is not a valid PHC string");
            return false;
        };
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// [`verify`](Self::verify) on the blocking pool.
    pub async fn verify_blocking(
        &self,
        plaintext: String,
        digest: PasswordDigest,
    ) -> Result<bool, DomainError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &digest))
            .await
            .map_err(|e| DomainError::internal(format!("password verification task failed: {e}")))
    }

    /// A well-formed digest with the current cost that no password matches.
    /// Verifying against it costs the same as a real check.
    pub fn dummy_digest(&self) -> PasswordDigest {
        PasswordDigest(format!(
            "$argon2id$v=19$m={},t={},p={}$c29tZXNhbHRzb21lc2FsdA${}",
            self.params.m_cost(),
            self.params.t_cost(),
            self.params.p_cost(),
            "A".repeat(43),
        ))
    }
}

/// Hashing failures are server faults, never storage ones.
fn hashing_failed(e: impl core::fmt::Display) -> DomainError {
    DomainError::internal(format!("failed to hash password: {e}"))
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}
