//! Argon2id password hashing in PHC string format.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("argon2 error: {0}")]
    Argon2(String),

    #[error("stored password hash is not a valid PHC string")]
    InvalidHash,

    #[error("password does not match")]
    Mismatch,
}

/// Cost parameters for Argon2id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    /// Memory in KiB.
    pub memory_cost: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self {
            memory_cost: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Hashes new passwords and verifies presented ones.
///
/// Verification reads the parameters embedded in the stored PHC string, so
/// hashes made with other costs keep verifying after a parameter change.
#[derive(Debug, Clone)]
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    pub fn new(params: PasswordParams) -> Result<Self, PasswordError> {
        let params = Params::new(params.memory_cost, params.iterations, params.parallelism, None)
            .map_err(|err| PasswordError::Argon2(err.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| PasswordError::Argon2(e.to_string()))?;
        Ok(hash.to_string())
    }

    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> Result<(), PasswordError> {
        let parsed = PasswordHash::new(phc_hash).map_err(|_| PasswordError::InvalidHash)?;
        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .map_err(|_| PasswordError::Mismatch)
    }
}

impl Default for PasswordManager {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}
