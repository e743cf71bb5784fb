use thiserror::Error;

use crate::ClaimError;

/// Token encode/decode failure.
///
/// Each variant carries a stable machine-readable code (see [`TokenError::code`]);
/// human-readable text is left to the boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token cannot be parsed (wrong shape, bad base64, bad JSON,
    /// missing registered claims).
    #[error("token is malformed")]
    Malformed,

    /// No configured verifier accepted the signature.
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The signature is valid but `exp` is not in the future.
    #[error("token has expired")]
    Expired,

    /// The claim set cannot be encoded for its token kind.
    #[error("cannot encode claim set: {0}")]
    Encoding(#[from] ClaimError),
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Expired => "expired",
            TokenError::Encoding(_) => "encoding_error",
        }
    }
}

/// Key material could not be turned into a signer or verifier.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("symmetric secret must be at least {min} bytes, got {actual}")]
    SecretTooShort { min: usize, actual: usize },

    #[error("an RSA signing key requires the matching public key for verification")]
    MissingPublicKey,

    #[error("RSA public key does not match the signing key")]
    KeyPairMismatch,

    #[error("invalid {what} PEM: {source}")]
    InvalidPem {
        what: &'static str,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}
