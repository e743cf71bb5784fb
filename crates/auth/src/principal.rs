use serde::{Deserialize, Serialize};

use crate::{ClaimSet, Role};

/// Identity of an authenticated caller (a human user or a peer service)
/// together with the roles its token grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            subject: subject.into(),
            roles,
        }
    }

    /// Build a principal from a verified claim set. Tokens without a roles
    /// claim yield a principal with no roles.
    pub fn from_claims(claims: &ClaimSet) -> Self {
        Self {
            subject: claims.subject.clone(),
            roles: claims.roles.clone().unwrap_or_default(),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
