use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

/// Role identifier used for role-membership checks.
///
/// Roles are opaque strings; the only policy Warden applies is "does the
/// principal carry this role".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("ADMIN"));
    pub const USER: Role = Role(Cow::Borrowed("USER"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claim names owned by the token format itself.
const REGISTERED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "nbf", "iat", "jti", "typ", "s2s"];

/// Name of the claim that carries roles.
///
/// Both services must agree on this value; it is configuration, never a
/// per-service convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RolesClaim(String);

impl RolesClaim {
    pub const DEFAULT: &'static str = "roles";

    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("roles claim name must not be empty"));
        }
        if trimmed != name {
            return Err(DomainError::validation(
                "roles claim name must not contain surrounding whitespace",
            ));
        }
        if REGISTERED_CLAIMS.contains(&trimmed) {
            return Err(DomainError::validation(format!(
                "roles claim name '{trimmed}' collides with a registered claim"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RolesClaim {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl core::fmt::Display for RolesClaim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
