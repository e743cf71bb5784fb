use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use warden_core::TokenId;

use crate::{Role, RolesClaim, TokenError};

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived proof of a human session; carries roles.
    Access,
    /// Long-lived, single-use credential exchanged for a new token pair.
    Refresh,
    /// Service-to-service credential addressed to a peer service.
    S2s,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::S2s => "s2s",
        }
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims asserted by a token (transport-agnostic).
///
/// Timestamps have whole-second precision, matching the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    /// Principal identifier.
    pub subject: String,
    pub issuer: String,
    /// Services the token is addressed to, in order.
    pub audience: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub kind: TokenKind,
    pub roles: Option<Vec<Role>>,
    /// `jti`, present only on refresh tokens.
    pub token_id: Option<TokenId>,
    /// Present (and true) only on S2S tokens.
    pub s2s: Option<bool>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("subject must not be empty")]
    EmptySubject,

    #[error("issuer must not be empty")]
    EmptyIssuer,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("timestamps must be whole seconds")]
    SubSecondTimestamp,

    #[error("refresh tokens require a jti")]
    MissingTokenId,

    #[error("only refresh tokens may carry a jti")]
    UnexpectedTokenId,

    #[error("access tokens require a roles claim")]
    MissingRoles,

    #[error("s2s tokens require a non-empty audience")]
    MissingAudience,

    #[error("s2s tokens require s2s=true")]
    MissingS2sFlag,

    #[error("only s2s tokens may carry the s2s flag")]
    UnexpectedS2sFlag,

    #[error("claim serialization failed: {0}")]
    Serialization(String),
}

impl ClaimSet {
    /// Access token claims for a human session.
    pub fn access(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        audience: Vec<String>,
        roles: Vec<Role>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let issued_at = whole_seconds(issued_at);
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
            audience,
            issued_at,
            expires_at: issued_at + ttl,
            kind: TokenKind::Access,
            roles: Some(roles),
            token_id: None,
            s2s: None,
        }
    }

    /// Refresh token claims bound to a ledger `jti`.
    pub fn refresh(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        token_id: TokenId,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let issued_at = whole_seconds(issued_at);
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
            audience: Vec::new(),
            issued_at,
            expires_at: issued_at + ttl,
            kind: TokenKind::Refresh,
            roles: None,
            token_id: Some(token_id),
            s2s: None,
        }
    }

    /// S2S claims: the issuing service is also the subject.
    pub fn s2s(
        issuer: impl Into<String>,
        audience: Vec<String>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let issuer = issuer.into();
        let issued_at = whole_seconds(issued_at);
        Self {
            subject: issuer.clone(),
            issuer,
            audience,
            issued_at,
            expires_at: issued_at + ttl,
            kind: TokenKind::S2s,
            roles: None,
            token_id: None,
            s2s: Some(true),
        }
    }

    pub fn is_addressed_to(&self, service_id: &str) -> bool {
        self.audience.iter().any(|aud| aud == service_id)
    }

    /// Check the required fields for this claim set's kind.
    pub fn validate(&self) -> Result<(), ClaimError> {
        if self.subject.trim().is_empty() {
            return Err(ClaimError::EmptySubject);
        }
        if self.issuer.trim().is_empty() {
            return Err(ClaimError::EmptyIssuer);
        }
        if self.expires_at <= self.issued_at {
            return Err(ClaimError::InvalidTimeWindow);
        }
        // The wire format carries whole seconds only.
        if self.issued_at.timestamp_subsec_nanos() != 0 || self.expires_at.timestamp_subsec_nanos() != 0 {
            return Err(ClaimError::SubSecondTimestamp);
        }

        match (self.kind, &self.token_id) {
            (TokenKind::Refresh, None) => return Err(ClaimError::MissingTokenId),
            (TokenKind::Access | TokenKind::S2s, Some(_)) => {
                return Err(ClaimError::UnexpectedTokenId);
            }
            _ => {}
        }

        match self.kind {
            TokenKind::Access => {
                if self.roles.is_none() {
                    return Err(ClaimError::MissingRoles);
                }
                if self.s2s.is_some() {
                    return Err(ClaimError::UnexpectedS2sFlag);
                }
            }
            TokenKind::Refresh => {
                if self.s2s.is_some() {
                    return Err(ClaimError::UnexpectedS2sFlag);
                }
            }
            TokenKind::S2s => {
                if self.audience.is_empty() {
                    return Err(ClaimError::MissingAudience);
                }
                if self.s2s != Some(true) {
                    return Err(ClaimError::MissingS2sFlag);
                }
            }
        }

        Ok(())
    }
}

/// Drop sub-second precision so a claim set compares equal after a trip
/// through the wire format.
pub fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// Serialized form of a claim set, as produced by a [`crate::Verifier`].
///
/// Field order is fixed, and roles live in `extra` under the configured
/// claim name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireClaims {
    sub: String,
    iss: String,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    aud: Vec<String>,
    iat: i64,
    exp: i64,
    typ: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s2s: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl WireClaims {
    pub(crate) fn from_claim_set(claims: &ClaimSet, roles_claim: &RolesClaim) -> Self {
        let mut extra = Map::new();
        if let Some(roles) = &claims.roles {
            extra.insert(
                roles_claim.as_str().to_string(),
                Value::Array(
                    roles
                        .iter()
                        .map(|r| Value::String(r.as_str().to_string()))
                        .collect(),
                ),
            );
        }

        Self {
            sub: claims.subject.clone(),
            iss: claims.issuer.clone(),
            aud: claims.audience.clone(),
            iat: claims.issued_at.timestamp(),
            exp: claims.expires_at.timestamp(),
            typ: claims.kind,
            jti: claims.token_id.as_ref().map(|jti| jti.as_str().to_string()),
            s2s: claims.s2s,
            extra,
        }
    }

    /// Convert a verified wire payload into a claim set.
    ///
    /// Only structural problems fail here; kind-specific requirements are
    /// left to the consumer so it can report them precisely.
    pub(crate) fn into_claim_set(mut self, roles_claim: &RolesClaim) -> Result<ClaimSet, TokenError> {
        let issued_at = DateTime::from_timestamp(self.iat, 0).ok_or(TokenError::Malformed)?;
        let expires_at = DateTime::from_timestamp(self.exp, 0).ok_or(TokenError::Malformed)?;

        let roles = match self.extra.remove(roles_claim.as_str()) {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(Role::new(s)),
                        _ => Err(TokenError::Malformed),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => return Err(TokenError::Malformed),
        };

        Ok(ClaimSet {
            subject: self.sub,
            issuer: self.iss,
            audience: self.aud,
            issued_at,
            expires_at,
            kind: self.typ,
            roles,
            token_id: self.jti.map(TokenId::from),
            s2s: self.s2s,
        })
    }
}

/// `aud` may be a single string or an array of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(aud) => aud,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        whole_seconds(Utc::now())
    }

    #[test]
    fn refresh_requires_jti_and_access_rejects_it() {
        let mut refresh = ClaimSet::refresh("alice", "user-service", TokenId::generate(), now(), Duration::days(7));
        assert_eq!(refresh.validate(), Ok(()));
        refresh.token_id = None;
        assert_eq!(refresh.validate(), Err(ClaimError::MissingTokenId));

        let mut access = ClaimSet::access("alice", "user-service", vec![], vec![Role::USER], now(), Duration::minutes(15));
        assert_eq!(access.validate(), Ok(()));
        access.token_id = Some(TokenId::generate());
        assert_eq!(access.validate(), Err(ClaimError::UnexpectedTokenId));
    }

    #[test]
    fn time_window_must_be_positive() {
        let claims = ClaimSet::access("alice", "user-service", vec![], vec![], now(), Duration::zero());
        assert_eq!(claims.validate(), Err(ClaimError::InvalidTimeWindow));
    }

    #[test]
    fn sub_second_timestamps_are_rejected() {
        let mut claims = ClaimSet::access("alice", "user-service", vec![], vec![], now(), Duration::seconds(60));
        assert!(claims.validate().is_ok());

        claims.expires_at += Duration::milliseconds(250);
        assert_eq!(claims.validate(), Err(ClaimError::SubSecondTimestamp));

        let mut claims = ClaimSet::refresh("alice", "user-service", TokenId::generate(), now(), Duration::seconds(60));
        claims.issued_at -= Duration::microseconds(1);
        assert_eq!(claims.validate(), Err(ClaimError::SubSecondTimestamp));
    }

    #[test]
    fn s2s_requires_audience_and_flag() {
        let claims = ClaimSet::s2s("admin-service", vec![], now(), Duration::minutes(10));
        assert_eq!(claims.validate(), Err(ClaimError::MissingAudience));

        let mut claims = ClaimSet::s2s("admin-service", vec!["user-service".into()], now(), Duration::minutes(10));
        assert_eq!(claims.validate(), Ok(()));
        assert_eq!(claims.subject, "admin-service");
        claims.s2s = Some(false);
        assert_eq!(claims.validate(), Err(ClaimError::MissingS2sFlag));
    }

    #[test]
    fn wire_form_places_roles_under_configured_claim() {
        let claims = ClaimSet::access("alice", "user-service", vec![], vec![Role::ADMIN], now(), Duration::minutes(15));
        let claim = RolesClaim::new("authorities").unwrap();
        let json = serde_json::to_value(WireClaims::from_claim_set(&claims, &claim)).unwrap();

        assert_eq!(json["authorities"], serde_json::json!(["ADMIN"]));
        assert_eq!(json["typ"], "access");
        assert!(json.get("aud").is_none());
        assert!(json.get("jti").is_none());
    }

    #[test]
    fn wire_form_accepts_single_string_audience() {
        let json = serde_json::json!({
            "sub": "admin-service",
            "iss": "admin-service",
            "aud": "user-service",
            "iat": 1_700_000_000,
            "exp": 1_700_000_600,
            "typ": "s2s",
            "s2s": true,
        });
        let wire: WireClaims = serde_json::from_value(json).unwrap();
        let claims = wire.into_claim_set(&RolesClaim::default()).unwrap();
        assert_eq!(claims.audience, vec!["user-service".to_string()]);
        assert!(claims.is_addressed_to("user-service"));
    }

    #[test]
    fn non_string_roles_are_malformed() {
        let json = serde_json::json!({
            "sub": "alice",
            "iss": "user-service",
            "iat": 1_700_000_000,
            "exp": 1_700_000_600,
            "typ": "access",
            "roles": [1, 2],
        });
        let wire: WireClaims = serde_json::from_value(json).unwrap();
        assert_eq!(
            wire.into_claim_set(&RolesClaim::default()).unwrap_err(),
            TokenError::Malformed
        );
    }
}
