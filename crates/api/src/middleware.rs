//! Request gates.
//!
//! Two gates run in the fixed order given by [`GATE_CHAIN`]:
//!
//! 1. **Authentication**: if a bearer token is present, verify it and attach
//!    the caller's [`PrincipalContext`] and [`VerifiedClaims`]. No header means
//!    the request continues unauthenticated.
//! 2. **S2S trust**: on internal path prefixes only, require a verified S2S
//!    token addressed to this service.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Router,
};

use warden_auth::{ClaimSet, Role, TokenCodec, TokenError, TokenKind};

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, VerifiedClaims};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Authentication,
    S2sTrust,
}

/// Gates in the order a request meets them.
pub const GATE_CHAIN: [Gate; 2] = [Gate::Authentication, Gate::S2sTrust];

#[derive(Clone)]
pub struct GateState {
    pub codec: Arc<TokenCodec>,
    /// This service's audience identifier.
    pub service_id: Arc<str>,
    pub internal_prefixes: Arc<[String]>,
}

impl GateState {
    pub fn new(codec: Arc<TokenCodec>, service_id: &str, internal_prefixes: &[String]) -> Self {
        Self {
            codec,
            service_id: Arc::from(service_id),
            internal_prefixes: Arc::from(internal_prefixes.to_vec()),
        }
    }

    fn is_internal(&self, path: &str) -> bool {
        self.internal_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Wrap `router` in every gate of [`GATE_CHAIN`], first gate outermost.
pub fn apply_gates(router: Router, state: GateState) -> Router {
    // Each `layer` call wraps the previous ones, so fold from the back.
    GATE_CHAIN.iter().rev().fold(router, |router, gate| match gate {
        Gate::Authentication => {
            router.layer(from_fn_with_state(state.clone(), authentication_gate))
        }
        Gate::S2sTrust => router.layer(from_fn_with_state(state.clone(), s2s_gate)),
    })
}

pub async fn authentication_gate(
    State(state): State<GateState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(Some(token)) => token,
        Ok(None) => return next.run(req).await,
        Err(err) => return err.into_response(),
    };

    let claims = match authenticate(&state.codec, token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(code = err.code(), path = %req.uri().path(), "bearer token rejected");
            return err.into_response();
        }
    };

    tracing::debug!(subject = %claims.subject, kind = %claims.kind, "request authenticated");
    attach_claims(&mut req, claims);
    next.run(req).await
}

/// Peer services are never human principals: S2S claims are kept for the trust
/// gate but establish no [`PrincipalContext`].
fn attach_claims(req: &mut Request, claims: ClaimSet) {
    if claims.kind != TokenKind::S2s {
        req.extensions_mut().insert(PrincipalContext::from_claims(&claims));
    }
    req.extensions_mut().insert(VerifiedClaims(claims));
}

fn authenticate(codec: &TokenCodec, token: &str) -> Result<ClaimSet, ApiError> {
    let claims = codec.decode(token)?;
    if claims.expires_at <= codec.now() {
        return Err(TokenError::Expired.into());
    }
    if claims.kind == TokenKind::Refresh {
        return Err(ApiError::WrongTokenType("refresh tokens are not request credentials"));
    }
    Ok(claims)
}

pub async fn s2s_gate(State(state): State<GateState>, req: Request, next: Next) -> Response {
    if !state.is_internal(req.uri().path()) {
        return next.run(req).await;
    }

    match check_s2s(&state, &req) {
        Ok(caller) => {
            tracing::debug!(caller = %caller, path = %req.uri().path(), "s2s call admitted");
            next.run(req).await
        }
        Err(err) => {
            tracing::warn!(code = err.code(), path = %req.uri().path(), "s2s call rejected");
            err.into_response()
        }
    }
}

fn check_s2s(state: &GateState, req: &Request) -> Result<String, ApiError> {
    let claims = match req.extensions().get::<VerifiedClaims>() {
        Some(VerifiedClaims(claims)) => claims.clone(),
        None => {
            let token = extract_bearer(req.headers())?
                .ok_or(ApiError::Unauthorized("s2s bearer token required"))?;
            authenticate(&state.codec, token)?
        }
    };

    if claims.kind != TokenKind::S2s || claims.s2s != Some(true) {
        return Err(ApiError::S2sRequired);
    }
    if !claims.is_addressed_to(&state.service_id) {
        return Err(ApiError::AudienceMismatch);
    }
    Ok(claims.subject)
}

/// `Ok(None)` when there is no bearer credential at all.
fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header
        .to_str()
        .map_err(|_| ApiError::Token(TokenError::Malformed))?;

    let Some((scheme, token)) = header.split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::Token(TokenError::Malformed));
    }
    Ok(Some(token))
}

/// Extractor for handlers that need an authenticated caller.
pub struct RequirePrincipal(pub PrincipalContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequirePrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PrincipalContext>()
            .cloned()
            .map(RequirePrincipal)
            .ok_or(ApiError::Unauthorized("authentication required"))
    }
}

pub fn require_role(principal: &PrincipalContext, role: &Role) -> Result<(), ApiError> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(role.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(&HeaderMap::new()).unwrap(), None);
        assert_eq!(extract_bearer(&headers("Basic abc")).unwrap(), None);
        assert_eq!(extract_bearer(&headers("Bearer abc.def.ghi")).unwrap(), Some("abc.def.ghi"));
        assert_eq!(extract_bearer(&headers("bearer abc.def.ghi")).unwrap(), Some("abc.def.ghi"));
        assert_eq!(extract_bearer(&headers("BEARER abc.def.ghi")).unwrap(), Some("abc.def.ghi"));
        assert_eq!(extract_bearer(&headers("Bearer")).unwrap(), None);
        assert!(matches!(
            extract_bearer(&headers("Bearer   ")),
            Err(ApiError::Token(TokenError::Malformed))
        ));
    }

    #[test]
    fn gate_chain_authenticates_before_checking_trust() {
        assert_eq!(GATE_CHAIN, [Gate::Authentication, Gate::S2sTrust]);
    }

    fn claims(kind: TokenKind) -> ClaimSet {
        let now = chrono::Utc::now();
        let ttl = chrono::Duration::seconds(60);
        match kind {
            TokenKind::S2s => ClaimSet::s2s("admin-service", vec!["user-service".into()], now, ttl),
            _ => ClaimSet::access("alice", "user-service", vec![], vec![Role::USER], now, ttl),
        }
    }

    #[test]
    fn s2s_claims_establish_no_principal() {
        let mut req = Request::new(axum::body::Body::empty());
        attach_claims(&mut req, claims(TokenKind::S2s));
        assert!(req.extensions().get::<PrincipalContext>().is_none());
        assert!(req.extensions().get::<VerifiedClaims>().is_some());

        let mut req = Request::new(axum::body::Body::empty());
        attach_claims(&mut req, claims(TokenKind::Access));
        assert_eq!(req.extensions().get::<PrincipalContext>().unwrap().subject(), "alice");
    }

    #[test]
    fn require_role_is_membership_only() {
        let principal = PrincipalContext::new(warden_auth::Principal::new("alice", vec![Role::USER]));
        assert!(require_role(&principal, &Role::USER).is_ok());
        assert!(matches!(
            require_role(&principal, &Role::ADMIN),
            Err(ApiError::Forbidden(role)) if role == "ADMIN"
        ));
    }
}
