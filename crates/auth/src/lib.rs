//! `warden-auth`: claim sets and the token codec.
//!
//! This crate is decoupled from HTTP and storage: it turns claim sets into
//! signed compact tokens and back, and nothing else.

pub mod claims;
pub mod codec;
pub mod error;
pub mod principal;
pub mod roles;

pub use claims::{ClaimError, ClaimSet, TokenKind, WireClaims};
pub use codec::{CodecSettings, JwtVerifier, KeyMaterial, TokenCodec, TokenTtl, Verifier};
pub use error::{KeyError, TokenError};
pub use principal::Principal;
pub use roles::{Role, RolesClaim};
