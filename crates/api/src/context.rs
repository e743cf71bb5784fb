use warden_auth::{ClaimSet, Principal, Role};

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn from_claims(claims: &ClaimSet) -> Self {
        Self::new(Principal::from_claims(claims))
    }

    pub fn subject(&self) -> &str {
        &self.principal.subject
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.principal.has_role(role)
    }
}

/// Claim set already verified by the authentication gate for this request.
///
/// Later gates reuse it instead of decoding the token again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims(pub ClaimSet);
