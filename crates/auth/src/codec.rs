use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use warden_core::{Clock, TokenId};

use crate::claims::WireClaims;
use crate::{ClaimSet, KeyError, Role, RolesClaim, TokenError};

/// Shortest symmetric secret accepted for HS256.
pub const MIN_SECRET_LEN: usize = 32;

/// Raw key material, as loaded from configuration.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub hmac_secret: Vec<u8>,
    /// PEM-encoded RSA private key. When present, tokens are signed RS256.
    pub rsa_private_pem: Option<Vec<u8>>,
    /// Public half of `rsa_private_pem`; verifies this service's own RS256 tokens.
    pub rsa_public_pem: Option<Vec<u8>>,
    /// The peer service's RSA public key, tried first when decoding.
    pub peer_public_pem: Option<Vec<u8>>,
}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("hmac_secret", &"<redacted>")
            .field("rsa_private_pem", &self.rsa_private_pem.as_ref().map(|_| "<redacted>"))
            .field("rsa_public_pem", &self.rsa_public_pem.is_some())
            .field("peer_public_pem", &self.peer_public_pem.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtl {
    pub access: Duration,
    pub refresh: Duration,
    pub s2s: Duration,
}

impl Default for TokenTtl {
    fn default() -> Self {
        Self {
            access: Duration::seconds(900),
            refresh: Duration::seconds(604_800),
            s2s: Duration::seconds(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodecSettings {
    /// `iss` of every minted token; also the subject of S2S tokens.
    pub issuer: String,
    pub roles_claim: RolesClaim,
    pub ttl: TokenTtl,
}

impl CodecSettings {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            roles_claim: RolesClaim::default(),
            ttl: TokenTtl::default(),
        }
    }
}

/// One trust source in the decode chain.
///
/// `InvalidSignature` means "not mine, ask the next one". Any other error is
/// final: the token was recognised but is unusable.
pub trait Verifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, token: &str) -> Result<WireClaims, TokenError>;
}

/// `jsonwebtoken`-backed verifier for a single algorithm and key.
pub struct JwtVerifier {
    name: &'static str,
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn hs256(secret: &[u8]) -> Self {
        Self::new("hs256", Algorithm::HS256, DecodingKey::from_secret(secret))
    }

    /// RS256 verifier for this service's own public key.
    pub fn rs256(public_pem: &[u8]) -> Result<Self, KeyError> {
        Ok(Self::new("rs256", Algorithm::RS256, rsa_public_key(public_pem, "RSA public key")?))
    }

    /// RS256 verifier for the peer service's public key.
    pub fn rs256_peer(public_pem: &[u8]) -> Result<Self, KeyError> {
        Ok(Self::new(
            "rs256-peer",
            Algorithm::RS256,
            rsa_public_key(public_pem, "peer RSA public key")?,
        ))
    }

    fn new(name: &'static str, algorithm: Algorithm, key: DecodingKey) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);
        Self {
            name,
            key,
            validation,
        }
    }
}

impl Verifier for JwtVerifier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn verify(&self, token: &str) -> Result<WireClaims, TokenError> {
        jsonwebtoken::decode::<WireClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| classify(&err))
    }
}

fn classify(err: &jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::MissingAlgorithm => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}

struct Signer {
    algorithm: Algorithm,
    key: EncodingKey,
}

/// Turns claim sets into signed compact tokens and back.
///
/// Holds no mutable state; the clock is injected so expiry is testable.
pub struct TokenCodec {
    signer: Signer,
    verifiers: Vec<Box<dyn Verifier>>,
    settings: CodecSettings,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Build the codec with the standard chain: peer RS256 key, own RS256
    /// key, then the HS256 secret. Absent keys are skipped.
    pub fn new(
        keys: &KeyMaterial,
        settings: CodecSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyError> {
        check_secret(&keys.hmac_secret)?;

        let mut verifiers: Vec<Box<dyn Verifier>> = Vec::with_capacity(3);
        if let Some(pem) = &keys.peer_public_pem {
            verifiers.push(Box::new(JwtVerifier::rs256_peer(pem)?));
        }
        if let Some(pem) = &keys.rsa_public_pem {
            verifiers.push(Box::new(JwtVerifier::rs256(pem)?));
        }
        verifiers.push(Box::new(JwtVerifier::hs256(&keys.hmac_secret)));

        Self::with_verifiers(keys, settings, clock, verifiers)
    }

    /// Build the codec with an explicit verifier chain, tried in order.
    pub fn with_verifiers(
        keys: &KeyMaterial,
        settings: CodecSettings,
        clock: Arc<dyn Clock>,
        verifiers: Vec<Box<dyn Verifier>>,
    ) -> Result<Self, KeyError> {
        check_secret(&keys.hmac_secret)?;

        let signer = match &keys.rsa_private_pem {
            Some(pem) => {
                let public = keys.rsa_public_pem.as_deref().ok_or(KeyError::MissingPublicKey)?;
                let key = EncodingKey::from_rsa_pem(pem).map_err(|source| KeyError::InvalidPem {
                    what: "RSA private key",
                    source,
                })?;
                check_key_pair(&key, &rsa_public_key(public, "RSA public key")?)?;
                Signer {
                    algorithm: Algorithm::RS256,
                    key,
                }
            }
            None => Signer {
                algorithm: Algorithm::HS256,
                key: EncodingKey::from_secret(&keys.hmac_secret),
            },
        };

        Ok(Self {
            signer,
            verifiers,
            settings,
            clock,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.settings.issuer
    }

    pub fn roles_claim(&self) -> &RolesClaim {
        &self.settings.roles_claim
    }

    pub fn ttl(&self) -> TokenTtl {
        self.settings.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn signing_algorithm(&self) -> Algorithm {
        self.signer.algorithm
    }

    /// Validate the claim set for its kind, then serialise and sign it.
    pub fn encode(&self, claims: &ClaimSet) -> Result<String, TokenError> {
        claims.validate()?;

        let wire = WireClaims::from_claim_set(claims, &self.settings.roles_claim);
        jsonwebtoken::encode(&Header::new(self.signer.algorithm), &wire, &self.signer.key)
            .map_err(|err| TokenError::Encoding(crate::ClaimError::Serialization(err.to_string())))
    }

    /// Verify a compact token and return its claims.
    ///
    /// The signature is proven before any claim is trusted. Kind-specific
    /// requirements (jti on refresh, s2s flag, audience) are left to the
    /// caller.
    pub fn decode(&self, token: &str) -> Result<ClaimSet, TokenError> {
        jsonwebtoken::decode_header(token).map_err(|_| TokenError::Malformed)?;

        let wire = self.verify_chain(token)?;
        let claims = wire.into_claim_set(&self.settings.roles_claim)?;

        if claims.expires_at <= claims.issued_at {
            return Err(TokenError::Malformed);
        }
        // Inclusive: a token is dead at its `exp` second.
        if claims.expires_at <= self.clock.now() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn verify_chain(&self, token: &str) -> Result<WireClaims, TokenError> {
        for verifier in &self.verifiers {
            match verifier.verify(token) {
                Ok(wire) => {
                    tracing::debug!(verifier = verifier.name(), "token signature verified");
                    return Ok(wire);
                }
                Err(TokenError::InvalidSignature) => {
                    tracing::debug!(verifier = verifier.name(), "verifier rejected signature");
                }
                Err(err) => return Err(err),
            }
        }
        Err(TokenError::InvalidSignature)
    }

    pub fn mint_access(
        &self,
        subject: &str,
        roles: Vec<Role>,
        audience: Vec<String>,
    ) -> Result<(String, ClaimSet), TokenError> {
        let claims = ClaimSet::access(
            subject,
            self.settings.issuer.clone(),
            audience,
            roles,
            self.clock.now(),
            self.settings.ttl.access,
        );
        let token = self.encode(&claims)?;
        Ok((token, claims))
    }

    pub fn mint_refresh(
        &self,
        subject: &str,
        token_id: &TokenId,
    ) -> Result<(String, ClaimSet), TokenError> {
        let claims = ClaimSet::refresh(
            subject,
            self.settings.issuer.clone(),
            token_id.clone(),
            self.clock.now(),
            self.settings.ttl.refresh,
        );
        let token = self.encode(&claims)?;
        Ok((token, claims))
    }

    /// Mint an S2S token with this service as issuer and subject.
    pub fn mint_s2s(&self, audience: Vec<String>) -> Result<(String, ClaimSet), TokenError> {
        let claims = ClaimSet::s2s(
            self.settings.issuer.clone(),
            audience,
            self.clock.now(),
            self.settings.ttl.s2s,
        );
        let token = self.encode(&claims)?;
        Ok((token, claims))
    }
}

fn rsa_public_key(pem: &[u8], what: &'static str) -> Result<DecodingKey, KeyError> {
    DecodingKey::from_rsa_pem(pem).map_err(|source| KeyError::InvalidPem { what, source })
}

/// The private key must sign what its configured public half verifies.
fn check_key_pair(private: &EncodingKey, public: &DecodingKey) -> Result<(), KeyError> {
    const MESSAGE: &[u8] = b"warden key pair check";
    let signature = jsonwebtoken::crypto::sign(MESSAGE, private, Algorithm::RS256)
        .map_err(|source| KeyError::InvalidPem {
            what: "RSA private key",
            source,
        })?;
    match jsonwebtoken::crypto::verify(&signature, MESSAGE, public, Algorithm::RS256) {
        Ok(true) => Ok(()),
        _ => Err(KeyError::KeyPairMismatch),
    }
}

fn check_secret(secret: &[u8]) -> Result<(), KeyError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(KeyError::SecretTooShort {
            min: MIN_SECRET_LEN,
            actual: secret.len(),
        });
    }
    Ok(())
}
